//! The decoder's view of the byte-pair tokenizer: encoding plain text, encoding the fixed
//! set of chat special tokens, and decoding a single id back to its string fragment. The
//! tokenizer itself (vocabulary, merge table, regex pre-split) is an external collaborator —
//! only this interface is owned here.

/// Chat-template control tokens the decoder loop reasons about directly. Anything else (byte
/// pairs, reserved slots) is opaque to the decoder and only ever round-trips through
/// `Tokenizer::decode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpecialToken {
    BeginText,
    EndText,
    BeginHeader,
    EndHeader,
    EndTurn,
    EndMessage,
    Ipython,
}

pub trait Tokenizer {
    /// Appends the ids for `text` to `out`, in encounter order.
    fn encode_text(&self, text: &str, out: &mut Vec<i32>);

    fn encode_special(&self, token: SpecialToken) -> i32;

    /// Decodes a single id to the string fragment it represents. Unlike `encode_text`, this is
    /// always single-id granularity, matching the decoder's one-token-at-a-time generation loop.
    fn decode(&self, id: i32) -> String;
}
