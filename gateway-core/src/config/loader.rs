//! Loads a `Configuration` from a top-level JSON file and/or a
//! `routes-path` directory of one-route-per-file JSON documents, per the
//! External Interfaces section: a `routes-path` directory overrides/augments
//! the `routes` array of the main config file.

use std::path::Path;

use super::route::{Configuration, Route};
use crate::error::{GatewayError, Result};

/// Loads the base configuration file (JSON, top-level `routes: [...]`).
pub fn load_config_file(path: &Path) -> Result<Configuration> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| GatewayError::Configuration(format!("reading {}: {e}", path.display())))?;
    serde_json::from_str(&raw)
        .map_err(|e| GatewayError::Configuration(format!("parsing {}: {e}", path.display())))
}

/// Loads every `*.json` file under `dir`, each parsed as a single `Route`,
/// and merges them into `config` using `Post` semantics (replace by name,
/// else append).
pub fn load_routes_dir(config: &mut Configuration, dir: &Path) -> Result<()> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| GatewayError::Configuration(format!("reading {}: {e}", dir.display())))?;

    let mut routes = Vec::new();
    for entry in entries {
        let entry = entry
            .map_err(|e| GatewayError::Configuration(format!("listing {}: {e}", dir.display())))?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let raw = std::fs::read_to_string(&path)
            .map_err(|e| GatewayError::Configuration(format!("reading {}: {e}", path.display())))?;
        let route: Route = serde_json::from_str(&raw)
            .map_err(|e| GatewayError::Configuration(format!("parsing {}: {e}", path.display())))?;
        routes.push(route);
    }
    config.merge(routes);
    validate_unique_names(config)
}

/// Route names must be unique within a configuration (§3).
pub fn validate_unique_names(config: &Configuration) -> Result<()> {
    let mut seen = std::collections::HashSet::new();
    for route in &config.routes {
        if !seen.insert(route.name.as_str()) {
            return Err(GatewayError::Configuration(format!(
                "duplicate route name {:?}",
                route.name
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_routes_directory_merging_by_name() {
        let dir = tempdir();
        std::fs::write(
            dir.join("a.json"),
            r#"{"name":"a","protocol":"rawTcp","condition":{"kind":"fixed"},"loadBalance":[{"address":"127.0.0.1:1","network":"tcp","weight":1}]}"#,
        )
        .unwrap();
        let mut config = Configuration::default();
        load_routes_dir(&mut config, &dir).unwrap();
        assert_eq!(config.routes.len(), 1);
        assert_eq!(config.routes[0].name, "a");
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn rejects_duplicate_names() {
        let mut config = Configuration::default();
        config.routes.push(route_named("dup"));
        config.routes.push(route_named("dup"));
        assert!(validate_unique_names(&config).is_err());
    }

    fn route_named(name: &str) -> Route {
        serde_json::from_str(&format!(
            r#"{{"name":"{name}","protocol":"rawTcp","condition":{{"kind":"fixed"}}}}"#
        ))
        .unwrap()
    }

    fn tempdir() -> std::path::PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!(
            "gateway-core-test-{}-{}",
            std::process::id(),
            name_suffix()
        ));
        std::fs::create_dir_all(&p).unwrap();
        p
    }

    fn name_suffix() -> u64 {
        use std::hash::{Hash, Hasher};
        let mut h = std::collections::hash_map::DefaultHasher::new();
        std::thread::current().id().hash(&mut h);
        h.finish()
    }

    #[allow(dead_code)]
    fn touch(p: &Path) {
        let mut f = std::fs::File::create(p).unwrap();
        writeln!(f, "{{}}").unwrap();
    }
}
