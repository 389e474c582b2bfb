#![allow(dead_code)]

// Only needed for the 'use gimli::*'-style constant imports (DW_AT_name etc).
#![allow(non_upper_case_globals)]

pub mod error;
pub mod os;
pub mod procfs;
pub mod registers;
pub mod elf;
pub mod symbols;
pub mod unwind;
pub mod eval;
pub mod debugger;
