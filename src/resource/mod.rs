/// Resource declarations: metadata objects, directive parsing, output kinds
pub mod annotations;
pub mod metadata;
pub mod output_kind;

pub use annotations::{describe_file, Declaration};
pub use metadata::{
    resource_id, MetadataObject, OutputType, ResourcePatch, VariableSpec, VariableType,
};
