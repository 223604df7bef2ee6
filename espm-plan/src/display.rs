//! Human readable plan display.

use std::fmt::Write;

use colored::Colorize;
use espm_resolve::{Decision, JobKind, Reason, Resolution, ResolverLists};

/// Renders the whole plan: actions in execution order, kept packages,
/// untaken suggestions and errors, followed by a summary line.
///
/// Colour is handled by the `colored` runtime switches; callers that need
/// stable output disable it first.
pub fn render_plan(lists: &ResolverLists) -> String {
    let mut out = String::new();

    let mut installs = 0usize;
    let mut uninstalls = 0usize;

    let _ = writeln!(out, "{}", "These are the actions I will take, in order:".bold());
    for id in &lists.taken {
        let Some(job) = lists.job(*id) else {
            continue;
        };
        match &job.kind {
            JobKind::SimpleInstall {
                origin, replacing, ..
            } => {
                installs += 1;
                let mut line = format!("    {} {}", "n".green(), origin.canonical_form().green());
                if !replacing.is_empty() {
                    let replaced: Vec<String> = replacing
                        .iter()
                        .map(|replaced| replaced.version().to_string())
                        .collect();
                    line.push_str(&format!(" (replacing {})", replaced.join(", ")));
                }
                let _ = writeln!(out, "{line}");
            }
            JobKind::Uninstall { ids } => {
                uninstalls += 1;
                for removed in ids {
                    let _ = writeln!(
                        out,
                        "    {} {}",
                        "<".red(),
                        removed.canonical_form().red()
                    );
                }
            }
            _ => {}
        }
    }

    let kept: Vec<&Resolution> = lists
        .resolutions
        .iter()
        .filter(|resolution| {
            matches!(
                resolution.decision,
                Some(Decision::ExistingNoChange { .. })
            ) && !resolution.is_untaken()
        })
        .collect();
    if !kept.is_empty() {
        let _ = writeln!(out, "\n{}", "I will keep the following as they are:".bold());
        for resolution in kept {
            if let Some(Decision::ExistingNoChange { id, is_best, .. }) = &resolution.decision {
                let marker = if *is_best { "" } else { " (not the best candidate)" };
                let _ = writeln!(out, "    - {}{marker}", id.canonical_form());
            }
        }
    }

    if !lists.untaken.is_empty() {
        let _ = writeln!(
            out,
            "\n{}",
            "I suggest the following, but will not install them:".bold()
        );
        for id in &lists.untaken {
            if let Some(job) = lists.job(*id) {
                if let JobKind::UntakenInstall { origin } = &job.kind {
                    let _ = writeln!(out, "    ? {}", origin.canonical_form().yellow());
                }
            }
        }
    }

    if !lists.taken_errors.is_empty() {
        let _ = writeln!(out, "\n{}", "I encountered the following errors:".bold().red());
        for index in &lists.taken_errors {
            let Some(resolution) = lists.resolutions.get(*index) else {
                continue;
            };
            let _ = writeln!(
                out,
                "    {} {}",
                "!".red(),
                resolution.resolvent.to_string().red()
            );
            if let Some(Decision::UnableToMake {
                unsuitable,
                unmet_constraints,
            }) = &resolution.decision
            {
                for constraint in unmet_constraints {
                    let _ = writeln!(out, "        needs {constraint}");
                    if let Reason::Dependency { from, dep } = constraint.reason.as_ref() {
                        let _ = writeln!(
                            out,
                            "            ({} of {}: {})",
                            dep.metadata_key_human_name(),
                            from.canonical_form(),
                            dep.original_spec
                        );
                    }
                }
                for candidate in unsuitable {
                    let _ = writeln!(out, "        cannot use {candidate}");
                }
            }
            for note in &resolution.unmet_notes {
                let _ = writeln!(out, "        {note}");
            }
        }
    }

    if !lists.unorderable.is_empty() {
        let _ = writeln!(
            out,
            "\n{}",
            "I could not order the following jobs:".bold().red()
        );
        for id in &lists.unorderable {
            if let Some(job) = lists.job(*id) {
                let _ = writeln!(out, "    {}", job.description());
            }
        }
    }

    let _ = writeln!(
        out,
        "\nTotal: {installs} installs, {uninstalls} uninstalls"
    );
    out
}
