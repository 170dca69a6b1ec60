//! Rotation and truncation tracking for tailed files.
//!
//! The tracker never touches the filesystem. The reader feeds it what it
//! observed at EOF (the identity currently at the path, the length of the
//! handle it holds, its own offset) and gets back what to do next.
//!
//! ```text
//!   OPEN ──identity changed / path gone──> ROTATION_PENDING
//!    ^                                        │ old handle drained,
//!    │                                        │ new file present
//!    └──────── first EOF after reopen ─── REOPENED
//! ```

use std::fs::Metadata;

/// Device and inode of a file; a change at the same path means rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileIdentity {
    pub device: u64,
    pub inode: u64,
}

impl FileIdentity {
    #[cfg(unix)]
    pub fn from_metadata(metadata: &Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;
        Self {
            device: metadata.dev(),
            inode: metadata.ino(),
        }
    }

    #[cfg(not(unix))]
    pub fn from_metadata(metadata: &Metadata) -> Self {
        // No inode off unix; creation time is the closest stable proxy
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        if let Ok(created) = metadata.created() {
            created.hash(&mut hasher);
        }
        Self {
            device: 0,
            inode: hasher.finish(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationState {
    Open,
    RotationPending,
    Reopened,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RotationEvent {
    Opened {
        identity: FileIdentity,
    },
    Truncated {
        offset: u64,
        len: u64,
    },
    RotationDetected {
        old: FileIdentity,
        new: Option<FileIdentity>,
    },
    Reopened {
        identity: FileIdentity,
    },
    Settled,
}

/// What the reader should do after hitting EOF.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationAction {
    /// Nothing changed; sleep and poll again
    Wait,
    /// The file shrank under us; read again from offset 0
    SeekStart,
    /// Read the old handle to EOF once more before switching
    Drain,
    /// Old handle is exhausted and a new file sits at the path
    Reopen,
}

/// What the reader saw at EOF.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EofProbe {
    /// Identity at the watched path, None when the path is missing
    pub path_identity: Option<FileIdentity>,
    /// Length of the handle currently held
    pub handle_len: u64,
    /// Reader offset in the held handle
    pub offset: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub action: RotationAction,
    pub event: Option<RotationEvent>,
}

impl Transition {
    fn quiet(action: RotationAction) -> Self {
        Self { action, event: None }
    }

    fn with(action: RotationAction, event: RotationEvent) -> Self {
        Self {
            action,
            event: Some(event),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RotationTracker {
    state: RotationState,
    identity: Option<FileIdentity>,
}

impl Default for RotationTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl RotationTracker {
    pub fn new() -> Self {
        Self {
            state: RotationState::Open,
            identity: None,
        }
    }

    pub fn state(&self) -> RotationState {
        self.state
    }

    pub fn identity(&self) -> Option<FileIdentity> {
        self.identity
    }

    /// Record that the reader (re)opened the path and now holds `identity`.
    pub fn opened(&mut self, identity: FileIdentity) -> RotationEvent {
        self.identity = Some(identity);
        if self.state == RotationState::RotationPending {
            self.state = RotationState::Reopened;
            RotationEvent::Reopened { identity }
        } else {
            self.state = RotationState::Open;
            RotationEvent::Opened { identity }
        }
    }

    pub fn on_eof(&mut self, probe: EofProbe) -> Transition {
        let Some(current) = self.identity else {
            return Transition::quiet(RotationAction::Reopen);
        };

        match self.state {
            RotationState::Open | RotationState::Reopened => {
                let settled = self.state == RotationState::Reopened;

                if probe.path_identity != Some(current) {
                    self.state = RotationState::RotationPending;
                    return Transition::with(
                        RotationAction::Drain,
                        RotationEvent::RotationDetected {
                            old: current,
                            new: probe.path_identity,
                        },
                    );
                }

                if probe.handle_len < probe.offset {
                    self.state = RotationState::Open;
                    return Transition::with(
                        RotationAction::SeekStart,
                        RotationEvent::Truncated {
                            offset: probe.offset,
                            len: probe.handle_len,
                        },
                    );
                }

                if settled {
                    self.state = RotationState::Open;
                    return Transition::with(RotationAction::Wait, RotationEvent::Settled);
                }

                Transition::quiet(RotationAction::Wait)
            }
            RotationState::RotationPending => match probe.path_identity {
                Some(identity) if identity == current => {
                    // Moved back into place; keep following the same handle
                    self.state = RotationState::Open;
                    Transition::quiet(RotationAction::Wait)
                }
                Some(_) => Transition::quiet(RotationAction::Reopen),
                None => Transition::quiet(RotationAction::Wait),
            },
        }
    }
}
