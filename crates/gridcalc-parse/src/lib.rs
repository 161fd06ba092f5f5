pub mod call;
pub mod extract;
pub mod reference;
pub mod tokenizer;

pub use call::{call_shape, CallArg, CallShape};
pub use extract::{extract_references, ExtractedRef};
pub use reference::{parse_reference, ParsedReference, RefPoint, ReferenceError};
pub use tokenizer::{Associativity, Token, TokenSubType, TokenType, Tokenizer, TokenizerError};
