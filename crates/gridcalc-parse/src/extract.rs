use crate::reference::{parse_reference, ParsedReference};
use crate::tokenizer::{TokenSubType, TokenType, Tokenizer};

/// A reference found in formula text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractedRef {
    Reference(ParsedReference),
    /// Looked like a reference but could not be resolved (defined names,
    /// external workbooks, malformed text, untokenizable formulas).
    Unresolved(String),
}

/// Every cell and range reference in `formula`, in source order.
///
/// Function names, literals and operators are skipped. A formula that does
/// not tokenize yields a single [`ExtractedRef::Unresolved`] so callers can
/// route it to a poisoned dependency instead of failing.
pub fn extract_references(formula: &str) -> Vec<ExtractedRef> {
    let tokenizer = match Tokenizer::new(formula) {
        Ok(t) => t,
        Err(_) => return vec![ExtractedRef::Unresolved(formula.to_string())],
    };
    tokenizer
        .items
        .iter()
        .filter(|t| t.token_type == TokenType::Operand && t.subtype == TokenSubType::Range)
        .map(|t| match parse_reference(&t.value) {
            Ok(r) => ExtractedRef::Reference(r),
            Err(_) => ExtractedRef::Unresolved(t.value.clone()),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridcalc_common::CellAddr;

    #[test]
    fn extracts_local_and_cross_sheet_references() {
        let refs = extract_references("=A1*2+SUM(Other!B1:B5)+'Q 1'!C:C");
        assert_eq!(refs.len(), 3);
        let ExtractedRef::Reference(first) = &refs[0] else {
            panic!("expected reference");
        };
        assert_eq!(first.cell(), Some(CellAddr::new(1, 1)));
        let ExtractedRef::Reference(third) = &refs[2] else {
            panic!("expected reference");
        };
        assert_eq!(third.sheet.as_deref(), Some("Q 1"));
    }

    #[test]
    fn literals_and_functions_are_not_references() {
        let refs = extract_references("=IF(TRUE, \"A1\", 3.5) & #N/A");
        assert!(refs.is_empty());
    }

    #[test]
    fn names_and_broken_formulas_are_unresolved() {
        let refs = extract_references("=TaxRate*A2");
        assert_eq!(refs[0], ExtractedRef::Unresolved("TaxRate".into()));
        assert!(matches!(refs[1], ExtractedRef::Reference(_)));

        let refs = extract_references("=SUM(A1");
        assert_eq!(refs, vec![ExtractedRef::Unresolved("=SUM(A1".into())]);
    }
}
