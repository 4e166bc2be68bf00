pub mod abstraction_layer;
pub mod nfs_layer;
pub mod null_layer;

pub use self::abstraction_layer::AbstractionLayer;
pub use self::nfs_layer::NFSAbstractionLayer;
pub use self::null_layer::NullAbstractionLayer;
