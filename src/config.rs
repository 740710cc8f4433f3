// Copyright (C) 2025 Michael Wilson <mike@mdwn.dev>
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
use std::path::{Path, PathBuf};

use crate::engine::Engine;

/// Finds the configuration file to execute at session start: the explicit
/// path if given and present, then the engine's per-user location, then its
/// system-wide location. Absence is a normal outcome, not an error.
pub fn resolve_config_file(engine: &dyn Engine, explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        if !path.as_os_str().is_empty() && path.exists() {
            return Some(path.to_path_buf());
        }
    }

    if let Some(path) = engine.user_config_path() {
        if path.exists() {
            return Some(path);
        }
    }

    if let Some(path) = engine.system_config_path() {
        if path.exists() {
            return Some(path);
        }
    }

    None
}

#[cfg(test)]
mod test {
    use std::{error::Error, fs, path::Path};

    use crate::engine::mock;

    use super::resolve_config_file;

    #[test]
    fn test_explicit_path_wins() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let explicit = dir.path().join("explicit.conf");
        let user = dir.path().join("user.conf");
        let system = dir.path().join("system.conf");
        fs::write(&explicit, "")?;
        fs::write(&user, "")?;
        fs::write(&system, "")?;

        let engine = mock::Engine::get("mock-engine");
        engine.set_user_config_path(Some(user.clone()));
        engine.set_system_config_path(Some(system.clone()));

        assert_eq!(
            Some(explicit.clone()),
            resolve_config_file(&engine, Some(&explicit))
        );
        Ok(())
    }

    #[test]
    fn test_missing_explicit_falls_through_to_user() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let user = dir.path().join("user.conf");
        let system = dir.path().join("system.conf");
        fs::write(&user, "")?;
        fs::write(&system, "")?;

        let engine = mock::Engine::get("mock-engine");
        engine.set_user_config_path(Some(user.clone()));
        engine.set_system_config_path(Some(system.clone()));

        let missing = dir.path().join("nope.conf");
        assert_eq!(Some(user), resolve_config_file(&engine, Some(&missing)));
        Ok(())
    }

    #[test]
    fn test_user_falls_through_to_system() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let system = dir.path().join("system.conf");
        fs::write(&system, "")?;

        let engine = mock::Engine::get("mock-engine");
        engine.set_user_config_path(Some(dir.path().join("missing-user.conf")));
        engine.set_system_config_path(Some(system.clone()));

        assert_eq!(Some(system), resolve_config_file(&engine, None));
        Ok(())
    }

    #[test]
    fn test_no_candidates_yields_none() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let engine = mock::Engine::get("mock-engine");
        engine.set_user_config_path(Some(dir.path().join("missing-user.conf")));
        engine.set_system_config_path(Some(dir.path().join("missing-system.conf")));

        assert_eq!(None, resolve_config_file(&engine, None));
        assert_eq!(
            None,
            resolve_config_file(&engine, Some(Path::new("/does/not/exist.conf")))
        );
        Ok(())
    }

    #[test]
    fn test_empty_explicit_path_is_ignored() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let user = dir.path().join("user.conf");
        fs::write(&user, "")?;

        let engine = mock::Engine::get("mock-engine");
        engine.set_user_config_path(Some(user.clone()));

        assert_eq!(Some(user), resolve_config_file(&engine, Some(Path::new(""))));
        Ok(())
    }
}
