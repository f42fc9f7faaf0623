use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};
use sled::Db;
use tracing::{debug, warn};

use crate::utils::error::Result;

const TOPICS_TREE: &str = "persistent_topics";

/// A persistent topic as written to disk.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StoredTopic {
    pub name: String,
    #[serde(rename = "type")]
    pub type_str: String,
    pub properties: Map<String, Json>,
    /// Last value as an encoded value frame.
    pub value: Option<Vec<u8>>,
    /// Milliseconds since the Unix epoch.
    pub saved_at: i64,
}

#[derive(Clone)]
pub struct Persistence {
    db: Db,
}

impl Persistence {
    pub fn open(path: &str) -> Result<Self> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    /// Replaces the stored set of topics with `topics`.
    pub fn save_topics(&self, topics: &[StoredTopic]) -> Result<()> {
        let tree = self.db.open_tree(TOPICS_TREE)?;
        tree.clear()?;
        for topic in topics {
            tree.insert(topic.name.as_bytes(), serde_json::to_vec(topic)?)?;
        }
        tree.flush()?;
        debug!("saved {} persistent topics", topics.len());
        Ok(())
    }

    /// Loads every stored topic in name order. Unreadable entries are skipped.
    pub fn load_topics(&self) -> Result<Vec<StoredTopic>> {
        let tree = self.db.open_tree(TOPICS_TREE)?;
        let mut topics = Vec::new();
        for entry in tree.iter() {
            let (key, val) = entry?;
            match serde_json::from_slice::<StoredTopic>(&val) {
                Ok(topic) => topics.push(topic),
                Err(e) => warn!(key = %String::from_utf8_lossy(&key), "skipping unreadable stored topic: {}", e),
            }
        }
        Ok(topics)
    }
}

impl std::fmt::Debug for Persistence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Persistence")
            .field("db", &"sled::Db")
            .finish()
    }
}
