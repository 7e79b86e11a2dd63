//! KGLM Data - Annotation encoding pipeline
//!
//! Turns persisted, span-annotated documents into token-aligned label arrays
//! and batches them for the scorer:
//! - Entity id normalization
//! - Alias database (surface-form tokens per entity)
//! - Annotation encoder (spans -> per-token labels) and span decoding
//! - JSON lines document reader
//! - Batch collation and chunked, slot-stable batch iteration

pub mod alias;
pub mod batch;
pub mod encoder;
pub mod iterator;
pub mod normalize;
pub mod reader;

pub use alias::AliasDatabase;
pub use batch::{build_vocabularies, extend_vocabularies, Batch, LabelBatch};
pub use encoder::{
    AnnotationEncoder, AnnotationEncoderBuilder, DecodedMention, KglmInstance, LabelArrays,
};
pub use iterator::{ChunkedBatcher, ChunkedBatches};
pub use normalize::normalize_entity_id;
pub use reader::{read_documents, DocumentReader};
