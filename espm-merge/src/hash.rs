//! Checksums of merged files.

use std::{fs::File, io::Read, path::Path};

use digest::Digest;
use espm_common::FileHashes;
use md5::Md5;
use ripemd::Ripemd160;
use sha1::Sha1;
use sha2::Sha256;

use crate::Error;

/// Hashes one file with every digest the journal records, in a single
/// read pass.
///
/// # Errors
///
/// Returns an error if the file cannot be read.
pub fn hash_file(path: &Path) -> Result<(u64, FileHashes), Error> {
    let mut file =
        File::open(path).map_err(|e| Error::io(path, "opening a file for hashing", e))?;

    let mut md5 = Md5::new();
    let mut rmd160 = Ripemd160::new();
    let mut sha1 = Sha1::new();
    let mut sha256 = Sha256::new();

    let mut size = 0u64;
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let read = file
            .read(&mut buffer)
            .map_err(|e| Error::io(path, "reading a file for hashing", e))?;
        if read == 0 {
            break;
        }
        size += read as u64;
        md5.update(&buffer[..read]);
        rmd160.update(&buffer[..read]);
        sha1.update(&buffer[..read]);
        sha256.update(&buffer[..read]);
    }

    fn hex(bytes: impl AsRef<[u8]>) -> String {
        bytes
            .as_ref()
            .iter()
            .map(|byte| format!("{byte:02x}"))
            .collect()
    }

    Ok((
        size,
        FileHashes {
            md5: hex(md5.finalize()),
            rmd160: hex(rmd160.finalize()),
            sha1: hex(sha1.finalize()),
            sha256: hex(sha256.finalize()),
        },
    ))
}
