//! Image assembly: layer packing and the Pull/Build/Push assembler.

mod assembler;
mod layer;

pub use assembler::{BuildConfig, BuildOutput, LayerAssembler, PulledImage, PushReport};
pub use layer::{pack_directory_as_layer, PackedLayer};
