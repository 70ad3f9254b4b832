//! Assembly entry point
//!
//! QEMU starts the boot stage at `_start` in EL1 with the MMU off. Secondary
//! cores are parked, FP/SIMD access is enabled, the stack is set up from the
//! linker script, BSS is cleared and control passes to `rust_main`.

use core::arch::global_asm;

global_asm!(
    r#"
    .section .text.boot, "ax"
    .global _start
_start:
    mrs     x1, mpidr_el1
    and     x1, x1, #0xff
    cbz     x1, 2f
1:
    wfe
    b       1b
2:
    // FP/SIMD on: the compiler uses it for memcpy and friends
    mov     x1, #(3 << 20)
    msr     cpacr_el1, x1
    isb

    ldr     x1, =__stack_top
    mov     sp, x1

    ldr     x1, =__bss_start
    ldr     x2, =__bss_end
3:
    cmp     x1, x2
    b.hs    4f
    str     xzr, [x1], #8
    b       3b
4:
    bl      rust_main
    b       1b
"#
);
