//! Raw OpenGL bindings, generated at build time by `gl_generator`.

#![allow(nonstandard_style)]
#![allow(unused)]
#![allow(clippy::all)]

include!(concat!(env!("OUT_DIR"), "/gl_bindings.rs"));
