#![no_std]
#![cfg_attr(target_arch = "powerpc", feature(asm_experimental_arch))]

#[cfg(test)]
extern crate std;

pub mod cpu;
pub mod mem;
