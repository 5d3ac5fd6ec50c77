use log::LevelFilter;

/// Initializes env_logger; `RUST_LOG` refines the level per module.
pub fn init_logger(level: LevelFilter) {
    env_logger::Builder::from_default_env().filter_level(level).init();
}
