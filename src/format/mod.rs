//! Output formats for rewritten clusters

mod csv;
mod json;

pub use self::csv::*;
pub use self::json::*;

use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;

use crate::ir::InstructionCluster;
use crate::{Address, LiftError};

/// Supported output formats for rewriting results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Plain text output (default)
    #[default]
    Text,
    /// JSON format (one document)
    Json,
    /// JSON Lines format (one JSON object per cluster)
    JsonLines,
    /// CSV format (one row per RTL instruction)
    Csv,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::JsonLines => write!(f, "jsonl"),
            OutputFormat::Csv => write!(f, "csv"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            "jsonl" | "jsonlines" => Ok(OutputFormat::JsonLines),
            "csv" => Ok(OutputFormat::Csv),
            _ => Err(format!("Unknown output format: {}", s)),
        }
    }
}

impl OutputFormat {
    /// Get all available output formats
    pub fn available_formats() -> &'static [Self] {
        &[
            OutputFormat::Text,
            OutputFormat::Json,
            OutputFormat::JsonLines,
            OutputFormat::Csv,
        ]
    }

    /// Get a formatter for this output format
    pub fn formatter(&self) -> Box<dyn ClusterFormatter> {
        match self {
            OutputFormat::Text => Box::new(TextFormatter),
            OutputFormat::Json => Box::new(JsonFormatter),
            OutputFormat::JsonLines => Box::new(JsonLinesFormatter),
            OutputFormat::Csv => Box::new(CsvFormatter),
        }
    }
}

/// Formatter trait for rewriting output
pub trait ClusterFormatter {
    /// Format the clusters rewritten from an image mapped at `base_addr`
    fn format(&self, clusters: &[InstructionCluster], base_addr: Address) -> Result<String, LiftError>;
}

/// Format clusters in plain text
pub struct TextFormatter;

/// Format clusters in JSON
pub struct JsonFormatter;

/// Format clusters in JSON Lines
pub struct JsonLinesFormatter;

/// Format clusters in CSV
pub struct CsvFormatter;

impl ClusterFormatter for TextFormatter {
    fn format(&self, clusters: &[InstructionCluster], base_addr: Address) -> Result<String, LiftError> {
        let mut output = format!("Rewritten at 0x{:x}:\n\n", base_addr);
        for cluster in clusters {
            output.push_str(&cluster.to_string());
        }
        Ok(output)
    }
}

#[cfg(test)]
pub(crate) fn sample_clusters() -> Vec<InstructionCluster> {
    use crate::ir::{Constant, DataType, Identifier, RtlClass, RtlInstruction};

    let w = Identifier::register("WREG", DataType::Byte, 0xFE8);
    vec![
        InstructionCluster::new(
            0x100,
            2,
            RtlClass::Linear,
            vec![RtlInstruction::Assign {
                dst: w.into(),
                src: Constant::new(5, DataType::Byte).into(),
            }],
        ),
        InstructionCluster::new(
            0x102,
            2,
            RtlClass::Return,
            vec![RtlInstruction::Return {
                return_address_size: 0,
                extra_bytes: 0,
            }],
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_formatter() {
        let result = TextFormatter.format(&sample_clusters(), 0x100).unwrap();
        assert!(result.starts_with("Rewritten at 0x100:"));
        assert!(result.contains("00000100(2): linear\n    WREG = 0x05\n"));
        assert!(result.contains("00000102(2): return\n    return (0,0)\n"));
    }

    #[test]
    fn test_format_names() {
        assert_eq!("jsonlines".parse::<OutputFormat>(), Ok(OutputFormat::JsonLines));
        assert_eq!(OutputFormat::JsonLines.to_string(), "jsonl");
        assert!("xml".parse::<OutputFormat>().is_err());
        assert_eq!(OutputFormat::default(), OutputFormat::Text);
    }

    #[test]
    fn test_format_selection() {
        for format in OutputFormat::available_formats() {
            let output = format.formatter().format(&sample_clusters(), 0x100).unwrap();
            assert!(output.contains("WREG"), "{} output lacks the RTL", format);
        }
    }
}
