mod error;
mod logging;
mod replay;
mod settings;

use clap::Parser;
use settings::Settings;

fn main() {
    logging::setup_logging();
    #[cfg(feature = "profiling")]
    profiling::register_thread!("main");

    let settings = Settings::parse();
    tracing::debug!("Settings: {:?}", settings);

    let stdout = std::io::stdout();
    let mut out = std::io::BufWriter::new(stdout.lock());
    let result = replay::run(&settings, &mut out)
        .and_then(|()| std::io::Write::flush(&mut out).map_err(Into::into));

    if let Err(e) = result {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}
