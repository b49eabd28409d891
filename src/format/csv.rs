//! CSV output formatter

use super::ClusterFormatter;
use crate::ir::InstructionCluster;
use crate::{Address, LiftError};

const HEADER: [&str; 6] = ["base_address", "address", "length", "class", "index", "rtl"];

impl ClusterFormatter for super::CsvFormatter {
    fn format(&self, clusters: &[InstructionCluster], base_addr: Address) -> Result<String, LiftError> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        let base_addr_str = format!("0x{:x}", base_addr);
        writer.write_record(HEADER)?;
        for cluster in clusters {
            let address = format!("0x{:x}", cluster.address);
            let length = cluster.length.to_string();
            let class = cluster.class.to_string();
            for (index, rtl) in cluster.rendered().iter().enumerate() {
                writer.write_record([
                    base_addr_str.as_str(),
                    address.as_str(),
                    length.as_str(),
                    class.as_str(),
                    index.to_string().as_str(),
                    rtl.as_str(),
                ])?;
            }
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| LiftError::Generic(format!("CSV flush error: {}", e)))?;
        String::from_utf8(bytes).map_err(|e| LiftError::Generic(format!("CSV encoding error: {}", e)))
    }
}
