//! Progress notifications.

use std::fmt::{Debug, Formatter};

use espm_types::DependenciesClass;

/// An event reported while resolving or executing.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum Notification {
    /// A dependency metadata key was evaluated for the first time.
    MetadataLoaded {
        /// The canonical form of the owning id.
        id: String,
        /// The evaluated class.
        class: DependenciesClass,
    },
    /// The resolver finished one step of work.
    ResolverStep {
        /// The resolvent the step worked on.
        resolvent: String,
        /// How many resolvents are still queued.
        pending: usize,
    },
    /// The resolver is restarting with a new preset constraint.
    ResolverRestart {
        /// The resolvent the restart is about.
        resolvent: String,
    },
    /// A job started executing.
    JobStarted {
        /// A short description of the job.
        description: String,
    },
    /// A job finished executing.
    JobFinished {
        /// A short description of the job.
        description: String,
        /// Whether the job succeeded.
        success: bool,
    },
    /// A job was skipped because of an earlier failure.
    JobSkipped {
        /// A short description of the job.
        description: String,
    },
}

/// A callback observing [`Notification`]s.
///
/// Callbacks observe; they are handed shared references only and cannot
/// mutate resolver state.
pub struct Notifier {
    callback: Option<Box<dyn Fn(&Notification)>>,
}

impl Notifier {
    /// Creates a notifier calling `callback` for every event.
    pub fn new(callback: impl Fn(&Notification) + 'static) -> Self {
        Self {
            callback: Some(Box::new(callback)),
        }
    }

    /// Creates a notifier that discards every event.
    pub fn silent() -> Self {
        Self { callback: None }
    }

    /// Reports one event.
    pub fn notify(&self, notification: &Notification) {
        if let Some(callback) = &self.callback {
            callback(notification);
        }
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Notifier::silent()
    }
}

impl Debug for Notifier {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("callback", &self.callback.is_some())
            .finish()
    }
}
