#![warn(clippy::pedantic, clippy::nursery)]
#![allow(
    clippy::module_name_repetitions,
    clippy::use_self,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc,
    clippy::suboptimal_flops
)]

use std::fs::File;
use std::path::Path;

use anyhow::{anyhow, Result};
use serde::{de::DeserializeOwned, Serialize};

pub mod average;
pub mod barrier;
pub mod config;
pub mod engine;
pub mod error;
pub mod expert;
pub mod logging;
pub mod quantities;
pub mod rand;
pub mod robot;
pub mod snapshot;
pub mod supervisor;
pub mod transport;

pub struct Json;

/// A type that can be loaded from / saved to a JSON file on disk. Used for
/// every config surface in this crate (`EngineConfig`, `BarrierConfig`, node
/// wiring); kept generic over a marker type the way other persisted formats
/// (e.g. a future binary tree-snapshot schema) could be added later without
/// disturbing this trait's callers.
pub trait Config<T>: Sized {
    fn valid_path(path: &Path) -> bool;
    fn save(&self, path: &Path) -> Result<()>;
    fn load(path: &Path) -> Result<Self>;
}

impl<T> Config<Json> for T
where
    T: Serialize + DeserializeOwned,
{
    fn valid_path(path: &Path) -> bool {
        path.extension().is_some_and(|x| x.to_str() == Some("json"))
    }

    fn save(&self, path: &Path) -> Result<()> {
        if !Self::valid_path(path) {
            return Err(anyhow!("Tried to write config to non-json file!"));
        }
        let mut file = File::create(path)?;
        Ok(serde_json::to_writer_pretty(&mut file, self)?)
    }

    fn load(path: &Path) -> Result<Self> {
        if !Self::valid_path(path) {
            return Err(anyhow!("Tried to read config from non-json file!"));
        }
        let file = File::open(path)?;
        Ok(serde_json::from_reader(file)?)
    }
}
