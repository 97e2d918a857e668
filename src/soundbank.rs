// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::collections::HashSet;
use std::fs::File;
use std::io::BufReader;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;

use soundfont::SoundFont2;
use tracing::{info, warn};

use crate::patches::Patch;

/// The set of patches the loaded soundbank provides.
///
/// An empty index carries no information about the soundbank, so it treats every
/// patch as available.
#[derive(Clone, Debug, Default)]
pub struct PatchIndex {
    patches: HashSet<Patch>,
}

impl PatchIndex {
    /// Returns true if the soundbank provides the given patch.
    pub fn provides(&self, patch: Patch) -> bool {
        self.patches.is_empty() || self.patches.contains(&patch)
    }

    /// Returns true if nothing is known about the soundbank.
    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }

    /// Returns the number of known patches.
    pub fn len(&self) -> usize {
        self.patches.len()
    }
}

impl FromIterator<Patch> for PatchIndex {
    fn from_iter<I: IntoIterator<Item = Patch>>(iter: I) -> Self {
        PatchIndex {
            patches: iter.into_iter().collect(),
        }
    }
}

/// A soundbank as seen by the scheduler: which patches exist and how loading went.
#[derive(Clone, Debug)]
pub struct Soundbank {
    index: PatchIndex,
    status: String,
}

impl Soundbank {
    /// Creates a soundbank from a known set of patches.
    pub fn new(index: PatchIndex, status: &str) -> Soundbank {
        Soundbank {
            index,
            status: status.to_string(),
        }
    }

    /// Loads the presets from the given SoundFont file. Loading never fails: problems
    /// are reported through the status and leave the index empty.
    pub fn load(path: Option<&Path>) -> Soundbank {
        let soundbank = match path {
            Some(path) => Soundbank::load_sf2(path),
            None => Soundbank::new(
                PatchIndex::default(),
                "No custom SoundFont specified, using default GM bank",
            ),
        };

        info!(
            status = soundbank.status,
            patches = soundbank.index.len(),
            "Soundbank ready."
        );
        soundbank
    }

    fn load_sf2(path: &Path) -> Soundbank {
        if !path.exists() {
            return Soundbank::new(
                PatchIndex::default(),
                &format!("SoundFont file does not exist: {}", path.display()),
            );
        }

        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) => {
                warn!(path = ?path, err = %e, "Unable to open SoundFont.");
                return Soundbank::new(
                    PatchIndex::default(),
                    &format!("SoundFont could not be opened: {}", e),
                );
            }
        };

        // The SF2 parser asserts on malformed chunks instead of returning an error.
        let parsed = panic::catch_unwind(AssertUnwindSafe(|| {
            SoundFont2::load(&mut BufReader::new(file))
        }));
        match parsed {
            Ok(Ok(sf2)) => {
                let index = sf2
                    .presets
                    .iter()
                    .filter_map(|preset| {
                        u8::try_from(preset.header.preset)
                            .ok()
                            .filter(|program| *program < 128)
                            .map(|program| Patch::new(preset.header.bank, program))
                    })
                    .collect::<PatchIndex>();
                let name = path
                    .file_name()
                    .map(|name| name.to_string_lossy().to_string())
                    .unwrap_or_else(|| path.display().to_string());
                Soundbank::new(index, &format!("SoundFont loaded: {}", name))
            }
            Ok(Err(e)) => {
                warn!(path = ?path, err = ?e, "Unable to parse SoundFont.");
                Soundbank::unparsed()
            }
            Err(_) => {
                warn!(path = ?path, "SoundFont is malformed.");
                Soundbank::unparsed()
            }
        }
    }

    fn unparsed() -> Soundbank {
        Soundbank::new(
            PatchIndex::default(),
            "SoundFont not supported or could not be parsed",
        )
    }

    /// The patches the soundbank provides.
    pub fn index(&self) -> &PatchIndex {
        &self.index
    }

    /// A human readable description of the soundbank.
    pub fn status(&self) -> &str {
        &self.status
    }
}
