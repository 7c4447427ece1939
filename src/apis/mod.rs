pub mod obs;
pub mod vagrant_cloud;
