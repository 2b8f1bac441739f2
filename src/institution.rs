use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::info;

use crate::compactor::{self, COMPACT_CHECK_INTERVAL};
use crate::engine::Engine;
use crate::limits::*;

/// Per-institution engines, created on first use. Institution = database
/// name from the pgwire startup packet; each one gets its own WAL file and
/// compactor task.
pub struct InstitutionRegistry {
    engines: DashMap<String, Arc<Engine>>,
    data_dir: PathBuf,
    compact_threshold: u64,
}

impl InstitutionRegistry {
    pub fn new(data_dir: PathBuf, compact_threshold: u64) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            compact_threshold,
        }
    }

    pub fn get_or_create(&self, institution: &str) -> io::Result<Arc<Engine>> {
        if institution.len() > MAX_INSTITUTION_NAME_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "institution name too long",
            ));
        }
        let key = sanitize(institution);
        if key.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "empty institution name",
            ));
        }
        if let Some(engine) = self.engines.get(&key) {
            return Ok(engine.value().clone());
        }
        if self.engines.len() >= MAX_INSTITUTIONS {
            return Err(io::Error::other("too many institutions"));
        }

        // Two names that sanitize alike share one WAL, so they share one engine.
        let engine = match self.engines.entry(key) {
            Entry::Occupied(e) => return Ok(e.get().clone()),
            Entry::Vacant(e) => {
                let wal_path = self.data_dir.join(format!("{}.wal", e.key()));
                let engine = Arc::new(Engine::new(wal_path)?);
                tokio::spawn(compactor::run_compactor(
                    engine.clone(),
                    self.compact_threshold,
                    COMPACT_CHECK_INTERVAL,
                ));
                info!("loaded institution {}", e.key());
                e.insert(engine).clone()
            }
        };
        metrics::gauge!(crate::observability::INSTITUTIONS_ACTIVE).set(self.engines.len() as f64);
        Ok(engine)
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }
}

/// Keep only characters safe in a file name.
fn sanitize(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use ulid::Ulid;

    fn test_data_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("classbook_test_institution").join(name);
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test]
    async fn institutions_are_isolated() {
        let registry = InstitutionRegistry::new(test_data_dir("isolation"), 1000);
        let north = registry.get_or_create("north_campus").unwrap();
        let south = registry.get_or_create("south_campus").unwrap();

        let room = Ulid::new();
        north.create_classroom(room, "A-101", 30, "admin").await.unwrap();
        south.create_classroom(room, "B-201", 12, "admin").await.unwrap();

        assert_eq!(north.get_classroom(room).await.unwrap().name, "A-101");
        assert_eq!(south.get_classroom(room).await.unwrap().name, "B-201");
        assert_eq!(north.audit_log(None).await.len(), 1);
    }

    #[tokio::test]
    async fn wal_created_lazily() {
        let dir = test_data_dir("lazy");
        let registry = InstitutionRegistry::new(dir.clone(), 1000);
        assert_eq!(fs::read_dir(&dir).unwrap().count(), 0);
        assert!(registry.is_empty());

        registry.get_or_create("uni").unwrap();
        assert!(dir.join("uni.wal").exists());
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn same_engine_returned() {
        let registry = InstitutionRegistry::new(test_data_dir("same"), 1000);
        let a = registry.get_or_create("uni").unwrap();
        let b = registry.get_or_create("uni").unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        // Sanitizes to the same file name.
        let c = registry.get_or_create("u.n.i").unwrap();
        assert!(Arc::ptr_eq(&a, &c));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn name_sanitized() {
        let dir = test_data_dir("sanitize");
        let registry = InstitutionRegistry::new(dir.clone(), 1000);

        registry.get_or_create("../evil").unwrap();
        assert!(dir.join("evil.wal").exists());
        assert!(registry.get_or_create("../..").is_err());
    }

    #[tokio::test]
    async fn name_too_long() {
        let registry = InstitutionRegistry::new(test_data_dir("too_long"), 1000);
        let err = registry
            .get_or_create(&"x".repeat(MAX_INSTITUTION_NAME_LEN + 1))
            .err()
            .unwrap();
        assert!(err.to_string().contains("institution name too long"));
        registry
            .get_or_create(&"x".repeat(MAX_INSTITUTION_NAME_LEN))
            .unwrap();
    }

    #[tokio::test]
    async fn state_survives_reload() {
        let dir = test_data_dir("reload");
        let room = Ulid::new();
        {
            let registry = InstitutionRegistry::new(dir.clone(), 1000);
            let engine = registry.get_or_create("uni").unwrap();
            engine.create_classroom(room, "A-101", 30, "admin").await.unwrap();
        }
        let registry = InstitutionRegistry::new(dir, 1000);
        let engine = registry.get_or_create("uni").unwrap();
        assert_eq!(engine.get_classroom(room).await.unwrap().capacity, 30);
    }

    #[tokio::test]
    async fn institution_count_limit() {
        let registry = InstitutionRegistry::new(test_data_dir("count_limit"), 1000);
        for i in 0..MAX_INSTITUTIONS {
            registry.get_or_create(&format!("i{i}")).unwrap();
        }
        let err = registry.get_or_create("one_more").err().unwrap();
        assert!(err.to_string().contains("too many institutions"));
        // Already-loaded institutions stay reachable.
        registry.get_or_create("i0").unwrap();
    }
}
