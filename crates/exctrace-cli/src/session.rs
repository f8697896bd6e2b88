//! One analysis session: loads config/stubs, builds the [`ProgramModel`]
//! once, and memoizes [`PropagationResult`] per resolution mode for the
//! lifetime of the process (spec §3 "Lifecycle", spec §5 "memoized per
//! (model identity, mode, stub-library identity)").

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use thiserror::Error;

use exctrace_core::cache::FileCache;
use exctrace_core::config::{Config, ConfigError};
use exctrace_core::model::ProgramModel;
use exctrace_core::propagation::PropagationResult;
use exctrace_core::stubs::{StubError, StubLibrary};
use exctrace_core::types::ResolutionMode;
use exctrace_python::assembly::{self, AssemblyError};
use exctrace_python::detectors::{fastapi, flask, FrameworkConfig};
use exctrace_python::propagator::Propagator;
use tracing::warn;

pub const CONFIG_DIR: &str = ".exctrace";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Assembly(#[from] AssemblyError),
}

pub type SessionResult<T> = Result<T, SessionError>;

pub struct Session {
    pub project_dir: PathBuf,
    pub config: Config,
    pub model: ProgramModel,
    pub stubs: StubLibrary,
    pub stub_diagnostics: Vec<StubError>,
    propagation_memo: RefCell<HashMap<ResolutionMode, PropagationResult>>,
}

impl Session {
    pub fn build(project_dir: &Path, no_cache: bool) -> SessionResult<Session> {
        let config = Config::load(project_dir)?;

        let (stubs, stub_diagnostics) = load_stubs(project_dir);
        let frameworks = default_frameworks();

        let cache = if no_cache {
            None
        } else {
            Some(FileCache::new(project_dir.join(CONFIG_DIR).join("cache")))
        };

        let model = assembly::build_model(project_dir, &config, cache.as_ref(), &frameworks)?;

        Ok(Session {
            project_dir: project_dir.to_path_buf(),
            config,
            model,
            stubs,
            stub_diagnostics,
            propagation_memo: RefCell::new(HashMap::new()),
        })
    }

    /// Run (or return the memoized) propagation for `mode`. `aggressive`
    /// collapses to `default` per DESIGN.md Open Question #1, so both share
    /// one memo slot.
    pub fn propagation(&self, mode: ResolutionMode) -> std::cell::Ref<'_, PropagationResult> {
        let memo_key = match mode {
            ResolutionMode::Aggressive => ResolutionMode::Default,
            other => other,
        };
        if !self.propagation_memo.borrow().contains_key(&memo_key) {
            let stubs = if self.stubs.is_empty() { None } else { Some(&self.stubs) };
            let result = Propagator::new(&self.model, &self.config, memo_key, stubs).run();
            if !result.converged {
                warn!(
                    iterations = result.iterations,
                    "propagation did not converge within the iteration guard"
                );
            }
            self.propagation_memo.borrow_mut().insert(memo_key, result);
        }
        std::cell::Ref::map(self.propagation_memo.borrow(), |m| &m[&memo_key])
    }
}

fn default_frameworks() -> Vec<FrameworkConfig> {
    vec![flask::config(), fastapi::config()]
}

fn load_stubs(project_dir: &Path) -> (StubLibrary, Vec<StubError>) {
    let mut lib = StubLibrary::new();
    let mut diagnostics = Vec::new();
    let stubs_dir = project_dir.join(CONFIG_DIR).join("stubs");
    let Ok(entries) = std::fs::read_dir(&stubs_dir) else {
        return (lib, diagnostics);
    };
    let mut paths: Vec<PathBuf> = entries.filter_map(|e| e.ok().map(|e| e.path())).collect();
    paths.sort();
    for path in paths {
        if path.extension().and_then(|e| e.to_str()) != Some("yaml") {
            continue;
        }
        match std::fs::read_to_string(&path) {
            Ok(contents) => {
                if let Err(err) = lib.load_str(&path, &contents) {
                    warn!(path = %path.display(), error = %err, "skipping malformed stub file");
                    diagnostics.push(err);
                }
            }
            Err(e) => diagnostics.push(StubError::Io {
                path: path.clone(),
                message: e.to_string(),
            }),
        }
    }
    (lib, diagnostics)
}
