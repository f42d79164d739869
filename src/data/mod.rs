pub mod morph;
pub mod pose;
pub mod transform;
pub mod vertex;
