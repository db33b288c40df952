pub mod animation;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod gallery;
pub mod gesture;
pub mod gpu;
pub mod loading;
pub mod session;
pub mod transform;
pub mod tasks {
    pub mod loader;
    pub mod viewer;
}
