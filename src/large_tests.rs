#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::Arc;
    use std::time::Instant;

    use tempfile::NamedTempFile;

    use crate::{
        arch::pic18::{devices, DeviceConfig, ExecMode, Pic18Decoder, Pic18Rewriter, RegisterCatalog},
        arch::x86::{X86Mode, X86Rewriter},
        decoder::CapstoneDecoder,
        format::OutputFormat,
        ir::{InstructionCluster, RtlClass},
        pseudo::PseudoProcedureTable,
        rewrite_image,
        sweep, Address, LiftError,
    };

    /// A small PIC18 program with four procedures:
    ///
    /// ```text
    /// 0x000  MOVLW 0x05        0x008  RLCF 0x20,W
    /// 0x002  RETURN            0x00A  RETURN
    /// 0x004  GOTO  0x1000      0x00C  RLCF 0x21,W
    ///                          0x00E  RETURN
    /// ```
    const PROGRAM: &[u16] = &[0x0E05, 0x0012, 0xEF00, 0xF008, 0x3420, 0x0012, 0x3421, 0x0012];
    const ENTRIES: &[Address] = &[0x000, 0x004, 0x008, 0x00C];

    fn words(words: &[u16]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    fn pic18(config: &DeviceConfig) -> (Pic18Decoder, Pic18Rewriter) {
        let catalog = Arc::new(RegisterCatalog::load(Some(config)).expect("catalog should load"));
        let decoder = Pic18Decoder::new(catalog.family(), ExecMode::Traditional);
        (decoder, Pic18Rewriter::new(catalog))
    }

    fn pic18f4620() -> (Pic18Decoder, Pic18Rewriter) {
        pic18(&devices::builtin("pic18f4620").unwrap())
    }

    #[test]
    fn test_pic18_linear_pipeline() {
        let (decoder, rewriter) = pic18f4620();
        let host = PseudoProcedureTable::new();
        let image = words(PROGRAM);

        let start = Instant::now();
        let clusters = sweep::linear::run(&decoder, &rewriter, &host, &image, 0).unwrap();
        println!("Rewrote {} clusters in {:?}", clusters.len(), start.elapsed());

        // GOTO is one cluster of four bytes; everything else is one word each.
        assert_eq!(clusters.len(), 7);
        let addresses: Vec<Address> = clusters.iter().map(|c| c.address).collect();
        assert_eq!(addresses, vec![0x0, 0x2, 0x4, 0x8, 0xA, 0xC, 0xE]);
        for pair in clusters.windows(2) {
            assert_eq!(pair[0].end_address(), pair[1].address, "clusters must tile the image");
        }
        assert_eq!(clusters[2].length, 4);
        assert_eq!(clusters[2].class, RtlClass::Transfer);
        assert_eq!(clusters[1].class, RtlClass::Return);
        assert_eq!(host.names(), vec!["__rlcf".to_string()]);
    }

    #[test]
    fn test_pic18_output_formats() {
        let (decoder, rewriter) = pic18f4620();
        let host = PseudoProcedureTable::new();
        let image = words(PROGRAM);
        let clusters = sweep::linear::run(&decoder, &rewriter, &host, &image, 0).unwrap();

        for format in [
            OutputFormat::Text,
            OutputFormat::Json,
            OutputFormat::JsonLines,
            OutputFormat::Csv,
        ] {
            let start = Instant::now();
            let output = match format.formatter().format(&clusters, 0) {
                Ok(result) => result,
                Err(e) => panic!("Formatting failed for {}: {}", format, e),
            };
            println!("{} formatting completed in {:?}", format, start.elapsed());
            assert!(!output.is_empty(), "Empty output for format {}", format);
            assert!(output.contains("goto 00001000"), "{} output lost the GOTO", format);
        }

        let json = OutputFormat::Json.formatter().format(&clusters, 0).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["clusters"].as_array().unwrap().len(), 7);
        assert_eq!(value["clusters"][2]["class"], "transfer");

        let lines = OutputFormat::JsonLines.formatter().format(&clusters, 0).unwrap();
        assert_eq!(lines.lines().count(), 7);
    }

    #[test]
    fn test_procedure_traces_share_pseudo_procedures() {
        let (decoder, rewriter) = pic18f4620();
        let host = PseudoProcedureTable::new();
        let image = words(PROGRAM);

        let traces = sweep::procedures::run(&decoder, &rewriter, &host, &image, 0, ENTRIES).unwrap();

        assert_eq!(traces.len(), ENTRIES.len());
        for (trace, &entry) in traces.iter().zip(ENTRIES) {
            assert_eq!(trace.entry, entry);
            assert_eq!(trace.clusters[0].address, entry);
            assert!(trace.clusters.last().unwrap().class.ends_trace());
        }
        let lengths: Vec<usize> = traces.iter().map(|t| t.clusters.len()).collect();
        assert_eq!(lengths, vec![2, 1, 2, 2]);

        // Both RLCF procedures ran on rayon workers against the same table.
        assert_eq!(host.len(), 1);
        assert_eq!(host.names(), vec!["__rlcf".to_string()]);
    }

    #[test]
    fn test_truncated_instruction_stops_the_stream() {
        let (decoder, rewriter) = pic18f4620();
        let host = PseudoProcedureTable::new();
        // MOVLW 0x05 followed by the first word of a GOTO
        let image = words(&[0x0E05, 0xEF00]);

        let results: Vec<Result<InstructionCluster, LiftError>> =
            rewrite_image(&decoder, &rewriter, &host, &image, 0x200).collect();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        match &results[1] {
            Err(LiftError::Decode(e)) => assert_eq!(e.address(), Some(0x202)),
            other => panic!("expected a decode error, got {:?}", other),
        }

        let err = sweep::linear::run(&decoder, &rewriter, &host, &image, 0x200).unwrap_err();
        assert!(matches!(err, LiftError::Decode(_)));
    }

    #[test]
    fn test_device_config_from_file() {
        let mut config = devices::builtin("pic18f4620").unwrap();
        config.forbidden_far_destinations.clear();

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(serde_json::to_string(&config).unwrap().as_bytes())
            .unwrap();
        let loaded = DeviceConfig::from_path(file.path()).unwrap();
        assert_eq!(loaded, config);

        // MOVFF 0x020, PCL is only allowed once PCL is no longer forbidden.
        let image = words(&[0xC020, 0xFFF9]);
        let host = PseudoProcedureTable::new();

        let (decoder, rewriter) = pic18f4620();
        let strict = sweep::linear::run(&decoder, &rewriter, &host, &image, 0).unwrap();
        assert_eq!(strict[0].class, RtlClass::Invalid);

        let (decoder, rewriter) = pic18(&loaded);
        let relaxed = sweep::linear::run(&decoder, &rewriter, &host, &image, 0).unwrap();
        assert_eq!(relaxed[0].rendered(), vec!["PCL = Mem[0x0020:byte]"]);
        assert_eq!(relaxed[0].length, 4);
    }

    #[test]
    fn test_x86_pipeline() {
        let decoder = CapstoneDecoder::new(X86Mode::Protected32);
        let rewriter = X86Rewriter::new(X86Mode::Protected32);
        let host = PseudoProcedureTable::new();
        // add eax, ebx ; ret
        let image = [0x01, 0xd8, 0xc3];

        let clusters = sweep::linear::run(&decoder, &rewriter, &host, &image, 0x401000).unwrap();
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0].address, 0x401000);
        assert_eq!(clusters[0].rendered(), vec!["eax = eax + ebx", "SCZO = cond(eax)"]);
        assert_eq!(clusters[1].address, 0x401002);
        assert_eq!(clusters[1].class, RtlClass::Return);
    }

    #[test]
    fn test_x86_fpu_pipeline() {
        let decoder = CapstoneDecoder::new(X86Mode::Protected32);
        let rewriter = X86Rewriter::new(X86Mode::Protected32);
        let host = PseudoProcedureTable::new();
        // fld dword ptr [eax] ; fstp dword ptr [ebx] ; ret
        let image = [0xD9, 0x00, 0xD9, 0x1B, 0xC3];

        let clusters = sweep::linear::run(&decoder, &rewriter, &host, &image, 0x1000).unwrap();
        assert_eq!(clusters.len(), 3);
        assert_eq!(
            clusters[0].rendered(),
            vec!["Top = Top - 0x01", "st0 = (real80) Mem[eax:real32]"]
        );
        assert_eq!(
            clusters[1].rendered(),
            vec!["Mem[ebx:real32] = (real32) st0", "Top = Top + 0x01"]
        );
        assert_eq!(clusters[2].class, RtlClass::Return);
    }

    #[test]
    fn test_x86_unsupported_opcode_stops_the_stream() {
        let decoder = CapstoneDecoder::new(X86Mode::Protected32);
        let rewriter = X86Rewriter::new(X86Mode::Protected32);
        let host = PseudoProcedureTable::new();
        // add eax, ebx ; cpuid ; ret
        let image = [0x01, 0xd8, 0x0f, 0xa2, 0xc3];

        let results: Vec<_> = rewrite_image(&decoder, &rewriter, &host, &image, 0x1000).collect();
        assert_eq!(results.len(), 2, "nothing is rewritten after a failure");
        assert!(results[0].is_ok());
        match &results[1] {
            Err(LiftError::UnsupportedOpcode { address, opcode, .. }) => {
                assert_eq!(*address, 0x1002);
                assert_eq!(opcode, "cpuid");
            }
            other => panic!("expected an unsupported opcode, got {:?}", other),
        }
    }
}
