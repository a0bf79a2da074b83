use splash::FluidConfig;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = splash::app::run(FluidConfig::default()) {
        log::error!("{}", e);
        std::process::exit(1);
    }
}
