//! Lazy instruction stream over a byte image, with one-instruction lookahead.

use crate::decoder::DecodeError;
use crate::{Address, Decoder, MachineInstruction};

/// Access to the instructions following the one being rewritten.
///
/// Rewriters use this to merge prefixes with the instruction they modify or
/// to size a skip over the next instruction. Anything consumed becomes part
/// of the current cluster.
pub trait Lookahead<I> {
    /// The next instruction, if one decodes cleanly.
    fn peek(&mut self) -> Option<&I>;

    /// Take the next instruction out of the stream.
    fn consume(&mut self) -> Option<I>;
}

/// Decodes instructions one at a time from `image`, which is mapped at `base`.
///
/// The stream ends when the decoder reports end of input. After a decode
/// error it yields that error once and then ends.
pub struct InstructionStream<'a, D: Decoder> {
    decoder: &'a D,
    image: &'a [u8],
    base: Address,
    offset: usize,
    peeked: Option<Option<Result<D::Instr, DecodeError>>>,
    finished: bool,
}

impl<'a, D: Decoder> InstructionStream<'a, D> {
    pub fn new(decoder: &'a D, image: &'a [u8], base: Address) -> Self {
        Self {
            decoder,
            image,
            base,
            offset: 0,
            peeked: None,
            finished: false,
        }
    }

    /// A stream starting at `start` instead of at `base`.
    pub fn starting_at(decoder: &'a D, image: &'a [u8], base: Address, start: Address) -> Self {
        let mut stream = Self::new(decoder, image, base);
        match start
            .checked_sub(base)
            .and_then(|offset| usize::try_from(offset).ok())
            .filter(|&offset| offset <= image.len())
        {
            Some(offset) => stream.offset = offset,
            None => stream.finished = true,
        }
        stream
    }

    /// Address of the next undecoded byte.
    pub fn current_address(&self) -> Address {
        self.base + self.offset as Address
    }

    /// Look at the next item without consuming it.
    pub fn peek(&mut self) -> Option<&Result<D::Instr, DecodeError>> {
        if self.peeked.is_none() {
            let next = self.decode_next();
            self.peeked = Some(next);
        }
        match &self.peeked {
            Some(next) => next.as_ref(),
            None => None,
        }
    }

    /// The next instruction, or `None` at end of input or before an error.
    pub fn peek_instruction(&mut self) -> Option<&D::Instr> {
        match self.peek() {
            Some(Ok(instr)) => Some(instr),
            _ => None,
        }
    }

    /// Take the next instruction if it decoded cleanly; errors stay queued.
    pub fn consume_instruction(&mut self) -> Option<D::Instr> {
        if self.peek_instruction().is_none() {
            return None;
        }
        match self.next() {
            Some(Ok(instr)) => Some(instr),
            _ => None,
        }
    }

    fn decode_next(&mut self) -> Option<Result<D::Instr, DecodeError>> {
        if self.finished || self.offset >= self.image.len() {
            self.finished = true;
            return None;
        }
        let address = self.current_address();
        match self.decoder.decode(&self.image[self.offset..], address) {
            Ok(Some(instr)) if instr.length() == 0 => {
                self.finished = true;
                Some(Err(DecodeError::invalid(address, "zero-length instruction")))
            }
            Ok(Some(instr)) => {
                self.offset += instr.length() as usize;
                Some(Ok(instr))
            }
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                log::debug!("decode failed at 0x{:x}: {}", address, e);
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

impl<D: Decoder> Iterator for InstructionStream<'_, D> {
    type Item = Result<D::Instr, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.peeked.take() {
            Some(next) => next,
            None => self.decode_next(),
        }
    }
}

impl<D: Decoder> Lookahead<D::Instr> for InstructionStream<'_, D> {
    fn peek(&mut self) -> Option<&D::Instr> {
        self.peek_instruction()
    }

    fn consume(&mut self) -> Option<D::Instr> {
        self.consume_instruction()
    }
}

/// Lookahead that yields nothing, for rewriting instructions in isolation.
pub struct NoLookahead;

impl<I> Lookahead<I> for NoLookahead {
    fn peek(&mut self) -> Option<&I> {
        None
    }

    fn consume(&mut self) -> Option<I> {
        None
    }
}

/// Lookahead over a fixed slice of already-decoded instructions.
pub struct SliceLookahead<'a, I> {
    rest: &'a [I],
}

impl<'a, I> SliceLookahead<'a, I> {
    pub fn new(rest: &'a [I]) -> Self {
        Self { rest }
    }
}

impl<I: Clone> Lookahead<I> for SliceLookahead<'_, I> {
    fn peek(&mut self) -> Option<&I> {
        self.rest.first()
    }

    fn consume(&mut self) -> Option<I> {
        let (first, rest) = self.rest.split_first()?;
        self.rest = rest;
        Some(first.clone())
    }
}
