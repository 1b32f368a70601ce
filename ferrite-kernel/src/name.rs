//! Kernel names follow `<op>[_<block_size>]_<dtype>`, e.g. `softmax_256_f32` or `copy_i32`.
//! The block size segment is optional and only meaningful to kernels that tile their
//! workgroup (`softmax`, `rmsnorm`, `sort`, `cumsum`); most kernels omit it.

use crate::{Error, Result};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KernelName {
    pub op: String,
    pub block_size: Option<u32>,
    pub dtype: String,
}

impl KernelName {
    pub fn parse(name: &str) -> Result<Self> {
        let parts: Vec<&str> = name.split('_').collect();
        if parts.len() < 2 {
            return Err(Error::MalformedKernelName(name.to_string()));
        }
        let dtype = parts.last().unwrap().to_string();
        let middle = &parts[..parts.len() - 1];
        if let Some((&last, op_parts)) = middle.split_last() {
            if let Ok(block_size) = last.parse::<u32>() {
                if op_parts.is_empty() {
                    return Err(Error::MalformedKernelName(name.to_string()));
                }
                return Ok(Self {
                    op: op_parts.join("_"),
                    block_size: Some(block_size),
                    dtype,
                });
            }
        }
        Ok(Self {
            op: middle.join("_"),
            block_size: None,
            dtype,
        })
    }

    pub fn canonical(&self) -> String {
        match self.block_size {
            Some(block_size) => format!("{}_{}_{}", self.op, block_size, self.dtype),
            None => format!("{}_{}", self.op, self.dtype),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_name_without_block_size() {
        let n = KernelName::parse("copy_i32").unwrap();
        assert_eq!(n.op, "copy");
        assert_eq!(n.block_size, None);
        assert_eq!(n.dtype, "i32");
    }

    #[test]
    fn parses_name_with_block_size() {
        let n = KernelName::parse("softmax_256_f32").unwrap();
        assert_eq!(n.op, "softmax");
        assert_eq!(n.block_size, Some(256));
        assert_eq!(n.dtype, "f32");
    }

    #[test]
    fn parses_multi_word_op() {
        let n = KernelName::parse("hadamard_broadcast_f16").unwrap();
        assert_eq!(n.op, "hadamard_broadcast");
        assert_eq!(n.dtype, "f16");
    }

    #[test]
    fn rejects_bare_dtype() {
        assert!(KernelName::parse("f32").is_err());
    }

    #[test]
    fn canonical_round_trips() {
        for raw in ["copy_i32", "softmax_256_f32", "hadamard_broadcast_f16"] {
            assert_eq!(KernelName::parse(raw).unwrap().canonical(), raw);
        }
    }
}
