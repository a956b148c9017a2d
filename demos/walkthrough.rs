use brkheap::global::{HEAP, calloc, free, malloc, realloc};

/// Prints the current program break as seen by the process-wide heap.
fn print_program_break(
  label: &str,
) {
  println!(
    "[{}] PID = {}, program break = {:?}",
    label,
    std::process::id(),
    HEAP.program_break(),
  );
}

fn print_blocks() {
  let mut lines = Vec::new();
  HEAP.for_each_block(|info| {
    lines.push(format!(
      "    {:?}  size = {:>4}  {}",
      info.payload,
      info.size,
      if info.is_free { "free" } else { "used" }
    ))
  });

  for line in lines {
    println!("{line}");
  }
}

fn main() {
  print_program_break("start");

  // --------------------------------------------------------------------
  // 1) Allocate 10 bytes: nothing to reuse yet, so the heap grows.
  // --------------------------------------------------------------------
  let mem = malloc(10);
  println!("\n[1] Allocated memory at: {:?}", mem);
  print_program_break("after malloc");

  unsafe {
    // ------------------------------------------------------------------
    // 2) Shrinking keeps the same block and its recorded size.
    // ------------------------------------------------------------------
    let mem = realloc(mem, 5);
    println!("\n[2] Reallocated memory at: {:?}", mem);

    // ------------------------------------------------------------------
    // 3) Growing moves the contents to a new block above the old one.
    // ------------------------------------------------------------------
    let mem = realloc(mem, 20);
    println!("\n[3] Reallocated memory at: {:?}", mem);
    print_blocks();

    // ------------------------------------------------------------------
    // 4) The new block ends at the break, so freeing it shrinks the heap.
    //    The first block stays behind, marked free.
    // ------------------------------------------------------------------
    free(mem);
    println!("\n[4] Freed memory at: {:?}", mem);
    print_program_break("after free");
    print_blocks();

    // ------------------------------------------------------------------
    // 5) 100 zeroed bytes do not fit the 10-byte free block.
    // ------------------------------------------------------------------
    let mem = calloc(10, 10);
    println!("\n[5] CAllocated memory at: {:?}", mem);
    print_blocks();

    free(mem);
    println!("\n[6] Freed memory at: {:?}", mem);
    print_program_break("end");
  }

  let stats = HEAP.stats();
  println!(
    "\n{} block(s) left, {} free, {} heap bytes",
    stats.blocks, stats.free_blocks, stats.heap_bytes
  );
}
