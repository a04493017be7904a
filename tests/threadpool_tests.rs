//! Worker pool lifecycle and phase ordering tests

use std::sync::Arc;

use cpuforge::{
    select_specialization, ComputeDevice, Context, CpuDevice, KernelRegistry, Op, TensorNode,
    ThreadPool,
};

fn host_registry() -> Arc<KernelRegistry> {
    let mut registry = KernelRegistry::new();
    select_specialization(&Context::new(), &mut registry);
    Arc::new(registry)
}

#[test]
fn test_teardown_with_no_ops_submitted() {
    let pool = ThreadPool::new(4, host_registry());
    assert_eq!(pool.num_allocated_workers(), 4);
    assert_eq!(pool.workers_online(), 3);
    assert_eq!(pool.phase(), 0);
    // Dropping interrupts, waits for the online counter to reach zero and
    // joins every worker; returning from this test is the assertion.
    drop(pool);
}

#[test]
fn test_device_teardown_immediately_after_creation() {
    let dvc = CpuDevice::new(&Context::new(), 4);
    assert!(dvc.has_pool());
    drop(dvc);
}

#[test]
fn test_phase_monotonicity_under_load() {
    let mut dvc = CpuDevice::new(&Context::new(), 8);
    dvc.set_numel_threshold(0);

    let a = TensorNode::random_seeded(&dvc, &[64, 64], 7).unwrap();
    let b = TensorNode::random_seeded(&dvc, &[64, 64], 8).unwrap();
    let c = TensorNode::binary(&dvc, Op::Mul, a.clone(), b.clone()).unwrap();

    // 64*64 elements with threshold 0 widen to 4 of the 8 workers, so every
    // phase also exercises parked-in-phase workers.
    assert_eq!(dvc.dynamic_work_scaling(c.numel()), 4);

    let mut last_phase = 0;
    for _ in 0..1000 {
        dvc.exec_fwd(&c);
        let phase = dvc.pool().unwrap().phase();
        assert!(phase > last_phase);
        last_phase = phase;
    }

    let pool = dvc.pool().unwrap();
    assert_eq!(pool.phase(), 1000);
    assert!(pool.worker_phases().iter().all(|&p| p == 1000));

    let expected: Vec<f32> = a
        .to_vec()
        .iter()
        .zip(b.to_vec())
        .map(|(&x, y)| x * y)
        .collect();
    assert_eq!(c.to_vec(), expected);
}

#[test]
fn test_single_thread_device_has_no_pool() {
    let dvc = CpuDevice::new(&Context::new(), 1);
    assert!(!dvc.has_pool());
    assert!(dvc.pool().is_none());

    let a = TensorNode::leaf(&dvc, &[2], &[1.0, 2.0]).unwrap();
    let b = TensorNode::leaf(&dvc, &[2], &[3.0, 4.0]).unwrap();
    let c = TensorNode::binary(&dvc, Op::Add, a, b).unwrap();
    dvc.exec_fwd(&c);
    assert_eq!(c.to_vec(), vec![4.0, 6.0]);
}
