use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::process;

use smt_decoder::smt_core::settings::DecoderConfig;
use smt_decoder::trace_init::{self, TraceOptions};
use smt_decoder::{Decoder, Translation, TranslationRequest};

macro_rules! die {
    ($result:expr, $($arg:tt)*) => {
        $result.unwrap_or_else(|e| {
            eprintln!($($arg)*, e);
            process::exit(1);
        })
    };
}

/// Config from `file`, or the built-in defaults, with command-line
/// overrides applied.
fn load_config(file: Option<&str>, threads: Option<usize>, weights: Option<&str>) -> DecoderConfig {
    let mut config = match file {
        Some(file) => die!(DecoderConfig::load(Path::new(file)), "Error in {file}: {}"),
        None => DecoderConfig::default(),
    };
    if let Some(threads) = threads {
        config.num_parallel_decoders = threads;
    }
    if let Some(weights) = weights {
        // later pairs win
        config.weight_overwrite = format!("{} {weights}", config.weight_overwrite);
    }
    config
}

fn build_decoder(config: DecoderConfig) -> Decoder {
    die!(Decoder::new(config), "Error: {}")
}

pub struct TranslateOptions<'a> {
    pub config: Option<&'a str>,
    pub threads: Option<usize>,
    /// `name value ...` pairs applied over every configured weight.
    pub weights: Option<&'a str>,
    pub input: Option<&'a str>,
    pub json: bool,
    pub trace_dir: Option<&'a str>,
    /// Trace filter directives, e.g. `smt_core=trace`.
    pub trace_filter: Option<&'a str>,
}

/// Translate every input line, printing results in input order.
pub fn translate(opts: &TranslateOptions<'_>) {
    if let Some(dir) = opts.trace_dir {
        if !Path::new(dir).is_dir() {
            eprintln!("Error: trace directory {dir} does not exist");
            process::exit(1);
        }
        let mut trace = TraceOptions::new(dir);
        trace.filter = opts.trace_filter.map(str::to_string);
        trace.per_process = true;
        trace_init::init_tracing(&trace);
    }
    let decoder = build_decoder(load_config(opts.config, opts.threads, opts.weights));

    let reader: Box<dyn BufRead + Send> = match opts.input {
        Some(path) => Box::new(BufReader::new(die!(File::open(path), "Error opening {path}: {}"))),
        None => Box::new(BufReader::new(io::stdin())),
    };
    let translations = die!(decoder.submit(TranslationRequest::new(reader)), "Error: {}");

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    let mut failed = 0usize;
    for translation in translations {
        if translation.is_failure() {
            failed += 1;
        }
        die!(write_translation(&mut out, &translation, opts.json), "Error writing output: {}");
    }
    decoder.shutdown();
    if failed > 0 {
        eprintln!("{failed} sentence(s) failed");
    }
}

fn write_translation(out: &mut impl Write, translation: &Translation, json: bool) -> io::Result<()> {
    if json {
        serde_json::to_writer(&mut *out, translation)?;
        writeln!(out)?;
    } else {
        writeln!(out, "{translation}")?;
        if let Some(output) = translation.directive_output() {
            eprintln!("{output}");
        }
    }
    // results may be read interactively
    out.flush()
}

pub fn show_weights(config: Option<&str>, weights: Option<&str>) {
    let decoder = build_decoder(load_config(config, Some(1), weights));
    println!("{}", decoder.show_weights());
    decoder.shutdown();
}
