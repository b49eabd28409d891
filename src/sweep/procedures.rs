//! Procedure traces: rewrite from several entry points in parallel.
//!
//! Each entry point gets its own instruction stream and emitters; the
//! decoder, rewriter and pseudo-procedure host are shared read-only.

use std::time::Instant;

use rayon::prelude::*;

use crate::ir::InstructionCluster;
use crate::pseudo::RewriterHost;
use crate::rewriter::{InstructionRewriter, RewriterStream};
use crate::stream::InstructionStream;
use crate::{Address, Decoder, LiftError};

/// Clusters rewritten from one entry point.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcedureTrace {
    pub entry: Address,
    pub clusters: Vec<InstructionCluster>,
}

/// Rewrite from `entry` until the first cluster execution cannot fall
/// through (return, unconditional transfer, halt or invalid).
pub fn trace<D, R>(
    decoder: &D,
    rewriter: &R,
    host: &dyn RewriterHost,
    image: &[u8],
    base: Address,
    entry: Address,
) -> Result<ProcedureTrace, LiftError>
where
    D: Decoder,
    R: InstructionRewriter<Instr = D::Instr>,
{
    let stream = InstructionStream::starting_at(decoder, image, base, entry);
    let mut clusters = Vec::new();
    for cluster in RewriterStream::new(stream, rewriter, host) {
        let cluster = cluster?;
        let done = cluster.class.ends_trace();
        clusters.push(cluster);
        if done {
            break;
        }
    }
    log::trace!("trace from 0x{:x}: {} clusters", entry, clusters.len());
    Ok(ProcedureTrace { entry, clusters })
}

/// Trace every entry point, in parallel. Results follow the order of
/// `entries`; the first failure wins.
pub fn run<D, R>(
    decoder: &D,
    rewriter: &R,
    host: &dyn RewriterHost,
    image: &[u8],
    base: Address,
    entries: &[Address],
) -> Result<Vec<ProcedureTrace>, LiftError>
where
    D: Decoder,
    R: InstructionRewriter<Instr = D::Instr>,
{
    log::debug!("tracing {} entry points", entries.len());
    let start_time = Instant::now();

    let traces = entries
        .par_iter()
        .map(|&entry| trace(decoder, rewriter, host, image, base, entry))
        .collect::<Result<Vec<_>, _>>()?;

    log::debug!(
        "traced {} entry points ({} clusters) in {:?}",
        traces.len(),
        traces.iter().map(|t| t.clusters.len()).sum::<usize>(),
        start_time.elapsed()
    );
    Ok(traces)
}
