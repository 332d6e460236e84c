use std::io::Read;

use libc::sbrk;
use segalloc::{Heap, SbrkArena};

/// Waits until the user presses ENTER.
/// Useful when you want to inspect memory state with tools like `pmap`, `htop`,
/// `gdb`, or just visually track how allocations change the program break.
fn block_until_enter_pressed() {
  println!("\n>>> Press ENTER to continue...");
  let _ = std::io::stdin().bytes().next();
}

/// Prints the current program break using `sbrk(0)`.
unsafe fn print_program_break(label: &str) {
  println!(
    "[{}] PID = {}, program break (sbrk(0)) = {:?}",
    label,
    std::process::id(),
    unsafe { sbrk(0) },
  );
}

fn print_alloc(
  heap: &Heap<SbrkArena>,
  size: usize,
  addr: *mut u8,
) {
  println!(
    "Requested {} bytes, address = {:?}, usable = {}, arena = {} bytes, free blocks = {}",
    size,
    addr,
    if addr.is_null() { 0 } else { unsafe { heap.usable_size(addr) } },
    heap.arena_size(),
    heap.free_block_count(),
  );
}

fn main() {
  let mut heap = Heap::new(SbrkArena::new());

  unsafe {
    print_program_break("start");

    if !heap.init() {
      println!("Could not claim the program break, giving up.");
      return;
    }

    print_program_break("after init");
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 1) Two small allocations land next to each other.
    // --------------------------------------------------------------------
    let first = heap.malloc(24);
    let second = heap.malloc(24);
    println!("\n[1] Allocate 24 bytes twice");
    print_alloc(&heap, 24, first);
    print_alloc(&heap, 24, second);

    first.cast::<u64>().write(0xDEADBEEF);
    println!("[1] Value written to first = 0x{:X}", first.cast::<u64>().read());

    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 2) Free the first block and ask for 16 bytes: the freed block is reused.
    // --------------------------------------------------------------------
    heap.free(first);
    let third = heap.malloc(16);
    println!("\n[2] free(first), then allocate 16 bytes");
    print_alloc(&heap, 16, third);
    println!(
      "[2] third == first? {}",
      if third == first {
        "Yes, it reused the freed block"
      } else {
        "No, it allocated somewhere else"
      }
    );

    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 3) realloc moves the data into a bigger block.
    // --------------------------------------------------------------------
    third.write_bytes(0xAB, 16);
    let grown = heap.realloc(third, 200);
    println!("\n[3] realloc(third, 200)");
    print_alloc(&heap, 200, grown);
    println!("[3] First byte after the move = 0x{:X}", grown.read());

    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 4) calloc hands out zeroed memory.
    // --------------------------------------------------------------------
    let zeroed = heap.calloc(10, 16);
    println!("\n[4] calloc(10, 16)");
    print_alloc(&heap, 160, zeroed);
    let all_zero = !zeroed.is_null() && (0..160).all(|i| zeroed.add(i).read() == 0);
    println!("[4] All zero? {}", all_zero);

    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 5) A large allocation forces the arena to grow.
    // --------------------------------------------------------------------
    print_program_break("before large alloc");

    let big = heap.malloc(64 * 1024);
    println!("\n[5] Allocate 64 KiB");
    print_alloc(&heap, 64 * 1024, big);

    print_program_break("after large alloc");
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 6) Free everything; neighbouring free blocks merge back together.
    // --------------------------------------------------------------------
    for ptr in [second, grown, zeroed, big] {
      heap.free(ptr);
    }
    println!("\n[6] Freed everything, free blocks = {}", heap.free_block_count());

    let report = heap.check();
    println!(
      "[6] Heap check: {} blocks, {} violations",
      report.blocks,
      report.violations.len()
    );

    // --------------------------------------------------------------------
    // 7) End of demo.
    //
    //    The arena never shrinks: the program break stays where it is and
    //    the OS reclaims everything when the process exits.
    // --------------------------------------------------------------------
    print_program_break("end");
    println!("\n[7] End of example. Process will exit and the OS will reclaim all memory.");
  }
}
