//! nuclide-lift - rewrite machine code into register-transfer IR
//!
//! Usage:
//!   nuclide-lift firmware.bin --arch pic18 --device pic18f4620
//!   nuclide-lift a.out                          Rewrite the text section
//!   nuclide-lift a.out --sweep procedures -e 401000 -e 401200

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use nuclide_lift::arch::pic18::{devices, DeviceConfig, ExecMode, Pic18Decoder, Pic18Rewriter, RegisterCatalog};
use nuclide_lift::arch::x86::{X86Mode, X86Rewriter};
use nuclide_lift::decoder::CapstoneDecoder;
use nuclide_lift::format::OutputFormat;
use nuclide_lift::ir::InstructionCluster;
use nuclide_lift::parser::{BinaryParser, GoblinParser};
use nuclide_lift::pseudo::PseudoProcedureTable;
use nuclide_lift::rewriter::InstructionRewriter;
use nuclide_lift::sweep::{self, Sweep};
use nuclide_lift::{Address, Architecture, Decoder};

#[derive(Parser)]
#[command(name = "nuclide-lift")]
#[command(about = "Rewrite machine code into a register-transfer IR", long_about = None)]
struct Cli {
    /// Path to an object file or raw code image
    #[arg(required_unless_present = "list_devices")]
    binary: Option<PathBuf>,

    /// Target architecture; required for raw images
    #[arg(short, long, value_enum)]
    arch: Option<Architecture>,

    /// Treat the input as a raw image even if it parses as an object file
    #[arg(long)]
    raw: bool,

    /// Load address of a raw image
    #[arg(short, long, value_parser = parse_hex, default_value = "0")]
    base: u64,

    /// Built-in PIC18 device description
    #[arg(short, long, default_value = "pic18f4620", conflicts_with = "device_config")]
    device: String,

    /// PIC18 device description in JSON
    #[arg(long)]
    device_config: Option<PathBuf>,

    /// PIC18 execution mode
    #[arg(short, long, value_enum, default_value_t)]
    mode: ExecMode,

    /// Output format
    #[arg(short, long, value_enum, default_value_t)]
    format: OutputFormat,

    /// How to walk the code
    #[arg(short, long, value_enum, default_value_t)]
    sweep: Sweep,

    /// Procedure entry points for the procedure sweep (hex)
    #[arg(short, long = "entry", value_parser = parse_hex)]
    entries: Vec<u64>,

    /// List the built-in PIC18 devices and exit
    #[arg(long)]
    list_devices: bool,
}

fn parse_hex(s: &str) -> Result<u64, String> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(s, 16).map_err(|e| e.to_string())
}

/// The bytes to rewrite and where they live.
struct Image {
    architecture: Architecture,
    base: Address,
    bytes: Vec<u8>,
    entry_point: Option<Address>,
}

fn load_image(cli: &Cli) -> Result<Image> {
    let Some(path) = &cli.binary else {
        bail!("No input file given");
    };
    let data = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;

    if !cli.raw {
        match GoblinParser::new().parse(&data) {
            Ok(meta) => {
                let architecture = cli.arch.unwrap_or(meta.architecture);
                let Some((base, bytes)) = meta.code_region(&data) else {
                    bail!("{} has no executable section", path.display());
                };
                return Ok(Image {
                    architecture,
                    base,
                    bytes: bytes.to_vec(),
                    entry_point: meta.entry_point,
                });
            }
            Err(e) => log::debug!("treating input as a raw image: {}", e),
        }
    }

    let Some(architecture) = cli.arch else {
        bail!("{} is not an object file; pass --arch for raw images", path.display());
    };
    Ok(Image {
        architecture,
        base: cli.base,
        bytes: data,
        entry_point: None,
    })
}

fn load_catalog(cli: &Cli) -> Result<RegisterCatalog> {
    let config = match &cli.device_config {
        Some(path) => DeviceConfig::from_path(path)
            .with_context(|| format!("Failed to load device config {}", path.display()))?,
        None => devices::builtin(&cli.device)?,
    };
    Ok(RegisterCatalog::load(Some(&config))?)
}

fn lift<D, R>(cli: &Cli, decoder: &D, rewriter: &R, image: &Image) -> Result<Vec<InstructionCluster>>
where
    D: Decoder,
    R: InstructionRewriter<Instr = D::Instr>,
{
    let host = PseudoProcedureTable::new();
    let clusters = match cli.sweep {
        Sweep::Linear => sweep::linear::run(decoder, rewriter, &host, &image.bytes, image.base)?,
        Sweep::Procedures => {
            let entries: Vec<Address> = if cli.entries.is_empty() {
                image.entry_point.into_iter().collect()
            } else {
                cli.entries.clone()
            };
            if entries.is_empty() {
                bail!("The procedure sweep needs at least one --entry");
            }
            sweep::procedures::run(decoder, rewriter, &host, &image.bytes, image.base, &entries)?
                .into_iter()
                .flat_map(|trace| trace.clusters)
                .collect()
        }
    };
    log::info!(
        "{}: {} clusters, pseudo-procedures: {:?}",
        cli.sweep,
        clusters.len(),
        host.names()
    );
    Ok(clusters)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.list_devices {
        for name in devices::names() {
            println!("{}", name);
        }
        return Ok(());
    }

    let image = load_image(&cli)?;
    let clusters = match image.architecture {
        Architecture::Pic18 => {
            let catalog = Arc::new(load_catalog(&cli)?);
            let decoder = Pic18Decoder::new(catalog.family(), cli.mode);
            let rewriter = Pic18Rewriter::new(catalog);
            lift(&cli, &decoder, &rewriter, &image)?
        }
        Architecture::X86_16 | Architecture::X86_32 | Architecture::X86_64 => {
            let decoder = CapstoneDecoder::for_architecture(image.architecture)?;
            let rewriter = X86Rewriter::new(X86Mode::from_architecture(image.architecture)?);
            lift(&cli, &decoder, &rewriter, &image)?
        }
        other => bail!("Unsupported architecture: {}", other),
    };

    let output = cli.format.formatter().format(&clusters, image.base)?;
    print!("{}", output);
    Ok(())
}
