//! Per-tick simulation trace, distinct from the leveled diagnostic logging
//! (`log::info!`/`log::warn!`/`log::debug!`) used elsewhere in the crate for
//! lifecycle and fault events. `Logger` is for the high-volume, structured
//! trace of engine/expert internals that a caller may want to redirect
//! per-node (one file per engine) rather than interleave through the global
//! `log` facade.

pub trait Logger {
    fn log(&mut self, msg: &str);
}

impl<'a, T> Logger for &'a mut T
where
    T: Logger,
{
    fn log(&mut self, msg: &str) {
        T::log(self, msg);
    }
}

pub struct PrintLogger {
    name: String,
}

impl PrintLogger {
    #[must_use]
    pub const fn new(name: String) -> PrintLogger {
        PrintLogger { name }
    }
}

impl Logger for PrintLogger {
    fn log(&mut self, msg: &str) {
        println!("[{}] {}", self.name, msg);
    }
}

pub struct NothingLogger {}

impl NothingLogger {
    #[must_use]
    pub const fn new() -> NothingLogger {
        NothingLogger {}
    }
}

impl Logger for NothingLogger {
    fn log(&mut self, _msg: &str) {}
}

impl Default for NothingLogger {
    fn default() -> Self {
        Self::new()
    }
}
