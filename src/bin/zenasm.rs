use std::{
    error::Error,
    fs::{self, File},
    io::{self, BufWriter, Write},
    path::PathBuf,
    process::ExitCode,
};

use clap::{Parser, ValueEnum};
use indexmap::IndexMap;
use serde::{de, Deserialize, Deserializer};
use serde_derive::Deserialize;
use tracing::Level;
use zenasm::{assembler::assemble_with_fill, Assembler, Compiler};

const MAX_BANKS: usize = 256;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// Assembly source file
    source: PathBuf,

    /// Output file (default: stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Number of 256-byte memory banks (default: 1)
    #[arg(short, long, value_parser = clap::value_parser!(u16).range(1..=256))]
    banks: Option<u16>,

    /// Config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Pre-defined labels (repeatable)
    #[arg(short = 'D', long, value_name="NAME=val", value_parser = zenasm::parse_defines::<String, u8>)]
    define: Vec<(String, u8)>,

    /// Output layout (default: flat)
    #[arg(short, long, value_enum)]
    format: Option<Format>,

    /// One of `TRACE`, `DEBUG`, `INFO`, `WARN`, or `ERROR`
    #[arg(short, long, default_value_t = Level::INFO)]
    log_level: Level,
}

fn main() -> ExitCode {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_max_level(args.log_level)
        .with_writer(io::stderr)
        .init();

    if let Err(e) = main_real(args) {
        tracing::error!("{e}");
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn main_real(args: Args) -> Result<(), Box<dyn Error>> {
    let config: Config = match &args.config {
        Some(path) => {
            let text = fs::read_to_string(path).map_err(|e| format!("cant open file: {e}"))?;
            toml::from_str(&text)?
        }
        None => Config::default(),
    };

    let settings = config.merge(args.banks, args.format, args.define)?;
    let source =
        fs::read_to_string(&args.source).map_err(|e| format!("cant open file: {e}"))?;
    let path = args.source.display().to_string();
    let located = |e: zenasm::Error| format!("{path}:{e}");

    let program = Compiler::new(&source, settings.banks)
        .with_labels(settings.labels)
        .finish()
        .map_err(located)?;

    let bytes: Vec<u8> = match settings.format {
        Format::Flat => Assembler::new(&program)
            .collect::<Result<_, _>>()
            .map_err(located)?,
        Format::Banks => assemble_with_fill(&program, settings.fill)
            .map_err(located)?
            .concat(),
    };

    let mut output: Box<dyn Write> = match args.output {
        Some(path) => Box::new(BufWriter::new(
            File::options()
                .write(true)
                .create(true)
                .truncate(true)
                .open(path)
                .map_err(|e| format!("cant open file: {e}"))?,
        )),
        None => Box::new(io::stdout()),
    };

    tracing::trace!("writing");
    output.write_all(&bytes)?;
    output.flush()?;

    tracing::debug!("labels: {}", program.labels.len());
    tracing::debug!("wrote {} bytes", bytes.len());

    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Format {
    /// Resolved bytes in instruction order
    Flat,
    /// One 256-byte image per bank
    Banks,
}

#[derive(Default, Deserialize)]
struct Config {
    #[serde(default)]
    banks: Option<usize>,

    #[serde(default)]
    format: Option<Format>,

    #[serde(default, deserialize_with = "deserialize_bases_u8")]
    fill: Option<u8>,

    #[serde(default, deserialize_with = "deserialize_labels")]
    labels: IndexMap<String, u8>,
}

/// Effective settings once the command line is layered over the config file.
struct Settings {
    banks: usize,
    format: Format,
    fill: u8,
    labels: IndexMap<String, u8>,
}

impl Config {
    fn merge(
        self,
        banks: Option<u16>,
        format: Option<Format>,
        defines: Vec<(String, u8)>,
    ) -> Result<Settings, String> {
        let banks = banks.map(usize::from).or(self.banks).unwrap_or(1);
        if !(1..=MAX_BANKS).contains(&banks) {
            return Err(format!("bank count {banks} is not in 1..={MAX_BANKS}"));
        }
        let mut labels = self.labels;
        labels.extend(defines);
        Ok(Settings {
            banks,
            format: format.or(self.format).unwrap_or(Format::Flat),
            fill: self.fill.unwrap_or(0),
            labels,
        })
    }
}

fn parse_bases_u8(buf: &str) -> Result<u8, String> {
    if let Some(hex) = buf.strip_prefix('#') {
        u8::from_str_radix(hex, 16)
            .map_err(|e| format!("{buf} is not a valid base 16 value: {e}"))
    } else if let Some(bin) = buf.strip_prefix('%') {
        u8::from_str_radix(bin, 2).map_err(|e| format!("{buf} is not a valid base 2 value: {e}"))
    } else {
        buf.parse()
            .map_err(|e| format!("{buf} is not a valid base 10 value: {e}"))
    }
}

fn deserialize_bases_u8<'de, D>(deserializer: D) -> Result<Option<u8>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer)?
        .map(|buf| parse_bases_u8(&buf).map_err(de::Error::custom))
        .transpose()
}

fn deserialize_labels<'de, D>(deserializer: D) -> Result<IndexMap<String, u8>, D::Error>
where
    D: Deserializer<'de>,
{
    let string_map = IndexMap::<String, String>::deserialize(deserializer)?;
    let mut map = IndexMap::new();
    for (name, buf) in string_map {
        let value = parse_bases_u8(&buf)
            .map_err(|e| de::Error::custom(format!("label `{name}`: {e}")))?;
        map.insert(name, value);
    }
    Ok(map)
}
