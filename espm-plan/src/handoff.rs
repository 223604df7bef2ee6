//! The plan handoff between the planning and executing processes.

use std::{
    fs::{File, OpenOptions},
    io::{Read, Write},
};

use crate::Error;

/// The environment variable naming the descriptor the serialised plan is
/// delivered on.
pub const SERIALISED_RESOLUTION_FD_VAR: &str = "PALUDIS_SERIALISED_RESOLUTION_FD";

/// Turns the variable's value into the `/dev/fd` path to open.
///
/// The descriptor is opened through `/dev/fd`, keeping the crate free of
/// unsafe descriptor adoption.
fn descriptor_path(value: Option<String>) -> Result<String, Error> {
    let value = value.ok_or_else(|| {
        Error::BadDescriptor(format!("{SERIALISED_RESOLUTION_FD_VAR} is not set"))
    })?;
    let fd: u32 = value
        .parse()
        .map_err(|_| Error::BadDescriptor(format!("{value:?} is not a descriptor number")))?;
    Ok(format!("/dev/fd/{fd}"))
}

/// Reads the whole serialised plan from the descriptor named by
/// [`SERIALISED_RESOLUTION_FD_VAR`].
///
/// # Errors
///
/// Returns an error if the variable is unset or unusable, or reading fails.
pub fn read_serialised_plan() -> Result<String, Error> {
    let path = descriptor_path(std::env::var(SERIALISED_RESOLUTION_FD_VAR).ok())?;
    let mut stream = String::new();
    File::open(&path)
        .and_then(|mut file| file.read_to_string(&mut stream))
        .map_err(|source| Error::Io {
            context: "reading the serialised plan stream",
            source,
        })?;
    Ok(stream)
}

/// Writes a serialised plan to the descriptor named by
/// [`SERIALISED_RESOLUTION_FD_VAR`].
///
/// # Errors
///
/// Returns an error if the variable is unset or unusable, or writing fails.
pub fn write_serialised_plan(stream: &str) -> Result<(), Error> {
    let path = descriptor_path(std::env::var(SERIALISED_RESOLUTION_FD_VAR).ok())?;
    OpenOptions::new()
        .write(true)
        .open(&path)
        .and_then(|mut file| file.write_all(stream.as_bytes()))
        .map_err(|source| Error::Io {
            context: "writing the serialised plan stream",
            source,
        })
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(Some("7"), Ok("/dev/fd/7"))]
    #[case(Some("0"), Ok("/dev/fd/0"))]
    #[case(Some("not-a-number"), Err(()))]
    #[case(Some("-1"), Err(()))]
    #[case(None, Err(()))]
    fn descriptor_paths(#[case] value: Option<&str>, #[case] expected: Result<&str, ()>) {
        let result = descriptor_path(value.map(str::to_string));
        match expected {
            Ok(path) => assert_eq!(result.unwrap(), path),
            Err(()) => assert!(matches!(result, Err(Error::BadDescriptor(_)))),
        }
    }
}
