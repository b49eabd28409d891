//! JSON and JSON Lines output formatters

use serde::Serialize;
use serde_json::json;

use super::ClusterFormatter;
use crate::ir::{InstructionCluster, RtlClass};
use crate::{Address, LiftError};

/// Serializable cluster for JSON output
#[derive(Serialize)]
struct ClusterJson {
    /// Address of the machine instruction
    address: String,
    /// Bytes covered by the cluster
    length: u32,
    class: RtlClass,
    /// RTL instructions as text
    instructions: Vec<String>,
}

/// Serializable rewriting result for JSON output
#[derive(Serialize)]
struct RewriteJson {
    base_address: String,
    clusters: Vec<ClusterJson>,
}

impl From<&InstructionCluster> for ClusterJson {
    fn from(cluster: &InstructionCluster) -> Self {
        ClusterJson {
            address: format!("0x{:x}", cluster.address),
            length: cluster.length,
            class: cluster.class,
            instructions: cluster.rendered(),
        }
    }
}

impl ClusterFormatter for super::JsonFormatter {
    fn format(&self, clusters: &[InstructionCluster], base_addr: Address) -> Result<String, LiftError> {
        let result = RewriteJson {
            base_address: format!("0x{:x}", base_addr),
            clusters: clusters.iter().map(ClusterJson::from).collect(),
        };
        Ok(serde_json::to_string_pretty(&result)?)
    }
}

impl ClusterFormatter for super::JsonLinesFormatter {
    fn format(&self, clusters: &[InstructionCluster], base_addr: Address) -> Result<String, LiftError> {
        let mut output = String::new();
        let base_addr_str = format!("0x{:x}", base_addr);
        for cluster in clusters {
            let line = json!({
                "base_address": base_addr_str,
                "cluster": ClusterJson::from(cluster),
            });
            output.push_str(&serde_json::to_string(&line)?);
            output.push('\n');
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::super::{sample_clusters, JsonFormatter, JsonLinesFormatter};
    use super::*;
    use serde_json::Value;

    #[test]
    fn test_json_document() {
        let text = JsonFormatter.format(&sample_clusters(), 0x100).unwrap();
        let doc: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(doc["base_address"], "0x100");
        assert_eq!(doc["clusters"][0]["class"], "linear");
        assert_eq!(doc["clusters"][0]["instructions"][0], "WREG = 0x05");
        assert_eq!(doc["clusters"][1]["address"], "0x102");
    }

    #[test]
    fn test_json_lines_one_per_cluster() {
        let text = JsonLinesFormatter.format(&sample_clusters(), 0x100).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let last: Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(last["cluster"]["class"], "return");
        assert_eq!(last["cluster"]["length"], 2);
    }
}
