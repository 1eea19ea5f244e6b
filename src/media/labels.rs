//! Class id to label text lookup
//!
//! Label files hold one `<id> <text...>` entry per line. The map is only
//! used for rendering.

use std::collections::HashMap;
use std::io::BufRead;
use std::path::Path;

use crate::error::Result;

/// Class id to text lookup
#[derive(Debug, Clone, Default)]
pub struct LabelMap {
    labels: HashMap<u16, String>,
}

impl LabelMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a label file from any reader
    ///
    /// Blank lines and lines whose first token is not a class id are skipped.
    pub fn from_reader(reader: impl BufRead) -> Result<Self> {
        let mut labels = HashMap::new();

        for line in reader.lines() {
            let line = line?;
            let mut parts = line.split_whitespace();
            let Some(id) = parts.next().and_then(|s| s.parse::<u16>().ok()) else {
                continue;
            };
            labels.insert(id, parts.collect::<Vec<_>>().join(" "));
        }

        Ok(Self { labels })
    }

    /// Load a label file from disk
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(std::io::BufReader::new(file))
    }

    pub fn insert(&mut self, id: u16, text: impl Into<String>) {
        self.labels.insert(id, text.into());
    }

    pub fn get(&self, id: u16) -> Option<&str> {
        self.labels.get(&id).map(String::as_str)
    }

    /// Text for `id`, falling back to the numeric id
    pub fn label(&self, id: u16) -> String {
        self.get(id).map_or_else(|| id.to_string(), str::to_string)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}
