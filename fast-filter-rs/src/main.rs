use std::io;

use fast_filter_rs as ffr;

struct StderrLogger;

impl log::Log for StderrLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &log::Record) {
        if self.enabled(record.metadata()) {
            eprintln!("{}: {}", record.level().to_string().to_lowercase(), record.args());
        }
    }

    fn flush(&self) {}
}

static LOGGER: StderrLogger = StderrLogger;

fn main() -> io::Result<()> {
    let opts = ffr::opts::parse_args();
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(if opts.quiet {
        log::LevelFilter::Error
    } else {
        log::LevelFilter::Info
    });
    ffr::run(&opts).map_err(Into::into)
}
