pub mod array;
pub mod logical;
pub mod math;
pub mod text;
pub(crate) mod utils;

pub fn load_builtins() {
    array::register_builtins();
    logical::register_builtins();
    math::register_builtins();
    text::register_builtins();
}
