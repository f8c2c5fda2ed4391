/*
 * Page Allocator Seam
 *
 * The scheduler obtains thread stacks as whole, zeroed, naturally aligned
 * pages. The real frame allocator belongs to the memory subsystem; this
 * module is the narrow interface the scheduler depends on, backed by the
 * kernel heap and bounded by a page budget so allocation failure is a
 * reachable, testable path (thread creation reports it instead of
 * panicking).
 *
 * Pages are freed explicitly, not on drop: a dying thread still runs on
 * its stack page until the context switch completes, so the successor
 * thread returns the page (see scheduler::Scheduler::finish_switch).
 */

use core::alloc::Layout;
use core::ptr::NonNull;

use spin::Mutex;

/// Page size in bytes.
pub const PGSIZE: usize = 4096;

/// Default page budget. The kernel binary sizes this from the boot memory
/// map; the default only needs to cover a reasonable thread population.
const DEFAULT_PAGE_LIMIT: usize = 1024;

struct Pool {
    allocated: usize,
    limit: usize,
}

static POOL: Mutex<Pool> = Mutex::new(Pool {
    allocated: 0,
    limit: DEFAULT_PAGE_LIMIT,
});

/// An owned kernel page, PGSIZE bytes, PGSIZE-aligned.
#[derive(Debug)]
pub struct Page {
    ptr: NonNull<u8>,
}

// The page is exclusively owned memory; the raw pointer is only an
// artifact of the manual free discipline.
unsafe impl Send for Page {}

impl Page {
    /// Lowest address of the page.
    pub fn base(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// One-past-the-end address of the page.
    pub fn top(&self) -> usize {
        self.ptr.as_ptr() as usize + PGSIZE
    }
}

fn page_layout() -> Layout {
    // PGSIZE is a power of two, so this cannot fail.
    Layout::from_size_align(PGSIZE, PGSIZE).unwrap()
}

/// Allocate one zeroed page, or None if the budget or the heap is
/// exhausted.
pub fn alloc_zeroed_page() -> Option<Page> {
    {
        let mut pool = POOL.lock();
        if pool.allocated >= pool.limit {
            return None;
        }
        pool.allocated += 1;
    }

    let raw = unsafe { alloc::alloc::alloc_zeroed(page_layout()) };
    match NonNull::new(raw) {
        Some(ptr) => Some(Page { ptr }),
        None => {
            POOL.lock().allocated -= 1;
            None
        }
    }
}

/// Return a page to the pool.
pub fn free_page(page: Page) {
    unsafe { alloc::alloc::dealloc(page.ptr.as_ptr(), page_layout()) };
    let mut pool = POOL.lock();
    debug_assert!(pool.allocated > 0, "freeing a page that was never allocated");
    pool.allocated -= 1;
}

/// Number of pages currently allocated.
pub fn pages_in_use() -> usize {
    POOL.lock().allocated
}

/// Set the page budget. Called once at boot from the memory map; tests
/// use it to provoke exhaustion.
pub fn set_limit(pages: usize) {
    POOL.lock().limit = pages;
}
