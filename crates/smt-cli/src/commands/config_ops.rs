use std::path::Path;
use std::process;

use smt_decoder::smt_core::settings::{self, DecoderConfig};

macro_rules! die {
    ($result:expr, $($arg:tt)*) => {
        $result.unwrap_or_else(|e| {
            eprintln!($($arg)*, e);
            process::exit(1);
        })
    };
}

pub fn config_export() {
    print!("{}", settings::default_toml());
}

pub fn config_validate(file: &str) {
    let config = die!(DecoderConfig::load(Path::new(file)), "Error in {file}: {}");
    println!(
        "OK: search={}, threads={}, features={}, grammars={}, top_n={}",
        config.search_algorithm,
        config.num_parallel_decoders,
        config.features.len(),
        config.grammars.len(),
        config.top_n
    );
}
