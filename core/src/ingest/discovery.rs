//! Discovery engine: populates the source registry on first launch.
//!
//! For each known proxy format, tries an operator-configured path from the
//! environment first, then a short list of conventional paths, validating
//! each candidate with the format's own cheap `can_parse` signature before
//! registering it.

use sqlx::SqlitePool;
use tracing::info;

use crate::db::registry;
use crate::model::LogSource;
use crate::parsers::ParserRegistry;

struct DetectorSpec {
    parser_type: &'static str,
    env_var: &'static str,
    conventional_paths: &'static [&'static str],
}

const DETECTORS: &[DetectorSpec] = &[
    DetectorSpec {
        parser_type: "traefik",
        env_var: "TRAEFIK_LOG_PATH",
        conventional_paths: &["/var/log/traefik/access.log", "/logs/traefik/access.log", "/data/access.log"],
    },
    DetectorSpec {
        parser_type: "caddy",
        env_var: "CADDY_LOG_PATH",
        conventional_paths: &["/var/log/caddy/access.log", "/logs/caddy/access.log"],
    },
];

/// Looks up a path override. Exists as a seam so tests don't depend on
/// process-global environment state.
pub trait EnvLookup {
    fn get(&self, key: &str) -> Option<String>;
}

pub struct ProcessEnv;
impl EnvLookup for ProcessEnv {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

fn read_first_line(path: &str) -> Option<String> {
    use std::io::BufRead;
    let file = std::fs::File::open(path).ok()?;
    std::io::BufReader::new(file).lines().next()?.ok()
}

/// Run discovery only if the registry is currently empty, registering the
/// first valid candidate path per detector. Returns the newly registered
/// sources.
pub async fn discover(
    pool: &SqlitePool,
    parsers: &ParserRegistry,
    env: &dyn EnvLookup,
) -> Result<Vec<LogSource>, sqlx::Error> {
    if !registry::list(pool).await?.is_empty() {
        return Ok(Vec::new());
    }

    let mut discovered = Vec::new();
    for detector in DETECTORS {
        let Some(parser) = parsers.get(detector.parser_type) else { continue };

        let mut candidates: Vec<String> = Vec::new();
        if let Some(configured) = env.get(detector.env_var) {
            candidates.push(configured);
        }
        candidates.extend(detector.conventional_paths.iter().map(ToString::to_string));

        for path in candidates {
            let Some(first_line) = read_first_line(&path) else { continue };
            if parser.can_parse(&first_line) {
                let source = LogSource::new(detector.parser_type, &path, detector.parser_type);
                registry::register(pool, &source).await?;
                info!(parser_type = detector.parser_type, path = %path, "discovered log source");
                discovered.push(source);
                break;
            }
        }
    }
    Ok(discovered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use std::collections::HashMap;
    use std::io::Write;

    struct MapEnv(HashMap<&'static str, String>);
    impl EnvLookup for MapEnv {
        fn get(&self, key: &str) -> Option<String> {
            self.0.get(key).cloned()
        }
    }

    #[tokio::test]
    async fn discovers_configured_traefik_path() {
        let pool = test_pool().await;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{"time":"2025-06-01T10:00:00Z","request_X-Real-Ip":"1.2.3.4:1","RequestMethod":"GET","RequestPath":"/","DownstreamStatus":200,"Duration":1}}"#
        )
        .unwrap();

        let mut env_map = HashMap::new();
        env_map.insert("TRAEFIK_LOG_PATH", file.path().to_str().unwrap().to_string());
        let env = MapEnv(env_map);

        let parsers = ParserRegistry::new();
        let discovered = discover(&pool, &parsers, &env).await.unwrap();
        assert_eq!(discovered.len(), 1);
        assert_eq!(discovered[0].parser_type, "traefik");
    }

    #[tokio::test]
    async fn skips_discovery_when_registry_not_empty() {
        let pool = test_pool().await;
        registry::register(&pool, &LogSource::new("existing", "/x.log", "traefik")).await.unwrap();

        let env = MapEnv(HashMap::new());
        let parsers = ParserRegistry::new();
        let discovered = discover(&pool, &parsers, &env).await.unwrap();
        assert!(discovered.is_empty());
    }

    #[tokio::test]
    async fn no_valid_candidates_discovers_nothing() {
        let pool = test_pool().await;
        let env = MapEnv(HashMap::new());
        let parsers = ParserRegistry::new();
        let discovered = discover(&pool, &parsers, &env).await.unwrap();
        assert!(discovered.is_empty());
    }
}
