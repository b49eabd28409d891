//! Linear sweep: rewrite an image front to back.

use std::time::Instant;

use crate::ir::InstructionCluster;
use crate::pseudo::RewriterHost;
use crate::rewriter::InstructionRewriter;
use crate::{rewrite_image, Address, Decoder, LiftError};

/// Rewrite every instruction of `image`, mapped at `base`.
///
/// # Returns
/// The clusters in address order, or the first failure.
pub fn run<D, R>(
    decoder: &D,
    rewriter: &R,
    host: &dyn RewriterHost,
    image: &[u8],
    base: Address,
) -> Result<Vec<InstructionCluster>, LiftError>
where
    D: Decoder,
    R: InstructionRewriter<Instr = D::Instr>,
{
    log::debug!(
        "starting {} linear sweep over {} bytes at 0x{:x}",
        rewriter.architecture(),
        image.len(),
        base
    );
    let start_time = Instant::now();

    let clusters = rewrite_image(decoder, rewriter, host, image, base)
        .collect::<Result<Vec<_>, _>>()?;

    log::debug!(
        "linear sweep produced {} clusters in {:?}",
        clusters.len(),
        start_time.elapsed()
    );
    Ok(clusters)
}
