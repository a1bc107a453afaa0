#[cfg(all(test, not(loom)))]
mod tests {
    use crate::memory::allocator::{AllocatorBackend, BackendKind};
    use crate::memory::dynamic::{DynamicMemory, DynamicMemoryConfig};
    use crate::memory::manager::MemoryManager;
    use crate::memory::stats::MemoryTag;
    use crate::sync::{thread, Arc, Mutex};

    #[test]
    fn test_integration_stress_mix() {
        // Interleaved traffic on a dynamic block, a pool and an arena.
        let manager = MemoryManager::new();
        let mut dynamic = DynamicMemory::new(1024 * 1024).unwrap();
        let mut pool = manager.pool_allocator(64, 64).unwrap();
        let mut frame = manager.arena_allocator(64 * 1024).unwrap();

        let mut blocks = Vec::new();
        let mut chunks = Vec::new();

        for i in 0u8..120 {
            match i % 3 {
                0 => {
                    let size = 16 + usize::from(i) * 8;
                    let p = dynamic.alloc(size).unwrap();
                    // Safety: Test code.
                    unsafe { p.as_ptr().write(i) };
                    blocks.push((p, size, i));
                }
                1 => {
                    let c = pool.alloc(48, MemoryTag::Entity).unwrap();
                    // Safety: Test code.
                    unsafe { c.as_ptr().write(i) };
                    chunks.push((c, i));
                }
                _ => {
                    let f = frame.alloc(8, MemoryTag::Renderer).unwrap();
                    // Safety: Test code.
                    unsafe { f.as_ptr().cast::<u64>().write(u64::from(i)) };
                }
            }

            if i % 30 == 0 {
                let mark = frame.begin_scope().unwrap();
                frame.alloc(512, MemoryTag::Renderer).unwrap();
                frame.end_scope(mark).unwrap();
            }
        }

        for (p, size, tag) in blocks {
            // Safety: Test code.
            assert_eq!(unsafe { p.as_ptr().read() }, tag);
            dynamic.free(p, size).unwrap();
        }
        for (c, tag) in chunks {
            // Safety: Test code.
            assert_eq!(unsafe { c.as_ptr().read() }, tag);
            pool.free(c, 48, MemoryTag::Entity).unwrap();
        }

        assert_eq!(dynamic.free_space(), dynamic.total_size());
        assert_eq!(dynamic.freelist().node_count(), 1);

        let g = manager.global_statistics();
        assert_eq!(g.allocs(MemoryTag::Entity), 0);
        assert_eq!(g.allocs(MemoryTag::Renderer), 40 + 4);
        assert_eq!(g.total_frees, 40);
    }

    #[test]
    fn test_integration_thread_contention() {
        // One allocator per thread, one shared aggregate.
        let manager = MemoryManager::new();
        let num_threads = 4u8;
        let iters = 100u8;
        let barrier = Arc::new(std::sync::Barrier::new(num_threads as usize));

        let handles: Vec<_> = (0..num_threads)
            .map(|t| {
                let b = barrier.clone();
                let mut alloc = manager.pool_allocator(32, usize::from(iters)).unwrap();
                thread::spawn(move || {
                    let mut ptrs = Vec::with_capacity(iters as usize);
                    b.wait();

                    for i in 0..iters {
                        let p = alloc.alloc(32, MemoryTag::Job).unwrap();
                        // Safety: Test code.
                        unsafe { p.as_ptr().write(t.wrapping_mul(31).wrapping_add(i)) };
                        ptrs.push(p);
                    }
                    for (i, p) in (0u8..).zip(ptrs.iter()) {
                        // Safety: Test code.
                        assert_eq!(
                            unsafe { p.as_ptr().read() },
                            t.wrapping_mul(31).wrapping_add(i),
                            "Contention caused corruption in thread {t}"
                        );
                    }
                    for p in ptrs {
                        alloc.free(p, 32, MemoryTag::Job).unwrap();
                    }
                    alloc.statistics().total_frees
                })
            })
            .collect();

        for h in handles {
            assert_eq!(h.join().unwrap(), u64::from(iters));
        }

        let g = manager.global_statistics();
        assert_eq!(g.total_frees, u64::from(num_threads) * u64::from(iters));
        assert_eq!(g.total_allocs, 0);
        assert_eq!(g.total_allocated, 0);
    }

    #[test]
    fn test_integration_mutex_shared_allocator() {
        let manager = MemoryManager::new();
        let shared = Arc::new(Mutex::new(manager.pool_allocator(64, 16).unwrap()));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let shared = shared.clone();
                thread::spawn(move || {
                    for _ in 0..50 {
                        let mut a = shared.lock().unwrap();
                        let p = a.alloc(64, MemoryTag::Resource).unwrap();
                        a.free(p, 64, MemoryTag::Resource).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let a = shared.lock().unwrap();
        assert_eq!(a.statistics().total_frees, 200);
        assert_eq!(a.statistics().total_allocs, 0);
    }

    #[test]
    fn test_integration_oom_handling() {
        let manager = MemoryManager::new();
        let mut pool = manager.pool_allocator(128, 1).unwrap();
        let _c1 = pool.alloc(128, MemoryTag::Unknown).unwrap();
        assert!(pool.alloc(128, MemoryTag::Unknown).is_err());

        let mut arena = manager.arena_allocator(4096).unwrap();
        assert!(arena.alloc(1 << 20, MemoryTag::Unknown).is_err());

        let mut dynamic = DynamicMemory::new(4096).unwrap();
        let _whole = dynamic.alloc(dynamic.total_size()).unwrap();
        assert!(dynamic.alloc(1).is_err());
    }

    #[test]
    fn test_integration_backend_release() {
        let manager = MemoryManager::new();
        let mut a = manager.pool_allocator(64, 4).unwrap();
        let p = a.alloc(64, MemoryTag::Game).unwrap();
        a.free(p, 64, MemoryTag::Game).unwrap();

        let backend = a.into_backend();
        assert!(matches!(backend.kind(), BackendKind::Exact));
        let AllocatorBackend::Pool(pool) = backend else {
            panic!("expected pool");
        };
        assert_eq!(pool.free_chunks(), 4);
        drop(pool);

        // The aggregate outlives the allocators bound to it.
        assert_eq!(manager.global_statistics().total_frees, 1);
    }

    #[test]
    fn test_integration_dynamic_resize_under_load() {
        let mut dynamic = DynamicMemory::with_config(DynamicMemoryConfig {
            total_size: 64 * 1024,
            reserve_size: 256 * 1024,
            ..DynamicMemoryConfig::default()
        })
        .unwrap();
        let base = dynamic.base();
        let a = dynamic.alloc(60 * 1024).unwrap();
        assert!(dynamic.alloc(8 * 1024).is_err());

        dynamic.resize(128 * 1024).unwrap();
        assert_eq!(dynamic.base(), base);
        let b = dynamic.alloc(8 * 1024).unwrap();
        assert!(dynamic.contains(b));

        dynamic.free(a, 60 * 1024).unwrap();
        dynamic.free(b, 8 * 1024).unwrap();
        assert_eq!(dynamic.free_space(), 128 * 1024);
    }
}
