//! PhotoFE: a single-image viewer and editor.
//!
//! The engine (`session`, `canvas`, `ops`, `components::tools`) has no GUI
//! dependency beyond egui's geometry types, so the headless CLI drives the
//! same code paths as the window.

#![allow(clippy::too_many_arguments)]

pub mod app;
pub mod canvas;
pub mod cli;
pub mod components;
pub mod io;
pub mod logger;
pub mod ops;
pub mod session;
pub mod settings;
