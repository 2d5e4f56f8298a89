use std::sync::OnceLock;

use tiktoken_rs::{cl100k_base, CoreBPE};

use crate::error::AppError;

/// Shared deterministic tokenizer used for chunk sizing, context budgeting
/// and usage accounting. The encoder tables are embedded in the binary, so
/// counts are stable across processes and runs.
pub fn tokenizer() -> Result<&'static CoreBPE, AppError> {
    static BPE: OnceLock<Result<CoreBPE, String>> = OnceLock::new();

    match BPE.get_or_init(|| cl100k_base().map_err(|e| e.to_string())) {
        Ok(bpe) => Ok(bpe),
        Err(err) => Err(AppError::InternalError(err.clone())),
    }
}

pub fn count_tokens(text: &str) -> Result<usize, AppError> {
    Ok(tokenizer()?.encode_ordinary(text).len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counting_is_deterministic() {
        let a = count_tokens("The quick brown fox jumps over the lazy dog").expect("count");
        let b = count_tokens("The quick brown fox jumps over the lazy dog").expect("count");
        assert_eq!(a, b);
        assert!(a > 0);
    }

    #[test]
    fn empty_text_counts_zero() {
        assert_eq!(count_tokens("").expect("count"), 0);
    }

    #[test]
    fn longer_text_counts_more() {
        let short = count_tokens("alpha beta").expect("count");
        let long = count_tokens("alpha beta gamma delta epsilon zeta eta theta").expect("count");
        assert!(long > short);
    }
}
