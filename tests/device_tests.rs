//! End-to-end tests for the CPU device

use cpuforge::{
    init_cpu_device, select_specialization, ComputeDevice, Context, CpuDevice, CpuFeatures,
    DeviceDescriptor, DeviceType, KernelRegistry, Op, TensorNode,
};

fn cpu_device(thread_count: usize) -> CpuDevice {
    let ctx = Context::new();
    let desc = DeviceDescriptor {
        device_type: DeviceType::Cpu,
        thread_count,
    };
    init_cpu_device(&ctx, &desc)
}

fn assert_close(actual: &[f32], expected: &[f32], rel_tol: f32) {
    assert_eq!(actual.len(), expected.len());
    for (i, (&a, &e)) in actual.iter().zip(expected).enumerate() {
        let scale = e.abs().max(1.0);
        assert!(
            (a - e).abs() <= rel_tol * scale,
            "element {i} differs: {a} vs {e}"
        );
    }
}

#[test]
fn test_single_thread_matmul() {
    let dvc = cpu_device(1);
    assert!(!dvc.has_pool());

    let a = TensorNode::leaf(&dvc, &[2, 2], &[1.0, 2.0, 3.0, 4.0]).unwrap();
    let b = TensorNode::leaf(&dvc, &[2, 2], &[5.0, 6.0, 7.0, 8.0]).unwrap();
    let c = TensorNode::matmul(&dvc, a, b).unwrap();

    dvc.exec_fwd(&c);
    assert_eq!(c.to_vec(), vec![19.0, 22.0, 43.0, 50.0]);
}

#[test]
fn test_multi_thread_matmul_matches_single_thread() {
    let single = cpu_device(1);
    let mut multi = cpu_device(4);
    // Force the heuristic past the single-worker fast path for 64x64.
    multi.set_numel_threshold(0);

    let a1 = TensorNode::random_seeded(&single, &[64, 64], 42).unwrap();
    let b1 = TensorNode::random_seeded(&single, &[64, 64], 43).unwrap();
    let c1 = TensorNode::matmul(&single, a1, b1).unwrap();
    single.exec_fwd(&c1);

    let a4 = TensorNode::random_seeded(&multi, &[64, 64], 42).unwrap();
    let b4 = TensorNode::random_seeded(&multi, &[64, 64], 43).unwrap();
    let c4 = TensorNode::matmul(&multi, a4, b4).unwrap();
    multi.exec_fwd(&c4);

    assert!(multi.dynamic_work_scaling(c4.numel()) > 1);
    assert_close(&c4.to_vec(), &c1.to_vec(), 1e-4);
}

#[test]
fn test_device_name_reports_cpu_and_threads() {
    let dvc = cpu_device(3);
    assert!(dvc.name().starts_with("CPU"));
    assert!(dvc.name().contains("Using 3 Compute Threads"));
    assert_eq!(dvc.device_type(), DeviceType::Cpu);
    assert!(!dvc.is_async());
}

#[test]
#[should_panic(expected = "not implemented")]
fn test_exec_bwd_aborts() {
    let dvc = cpu_device(1);
    let root = TensorNode::zeros(&dvc, &[2]).unwrap();
    dvc.exec_bwd(&root);
}

#[test]
fn test_specialization_fallback_still_computes() {
    let _ = tracing_subscriber::fmt().try_init();

    let ctx = Context::with_features("Mock CPU", 2, CpuFeatures::none());
    let mut registry = KernelRegistry::new();
    assert!(!select_specialization(&ctx, &mut registry));
    assert!(registry.is_fully_populated());

    let dvc = CpuDevice::new(&ctx, 2);
    let a = TensorNode::leaf(&dvc, &[4], &[1.0, 2.0, 3.0, 4.0]).unwrap();
    let b = TensorNode::leaf(&dvc, &[4], &[10.0, 20.0, 30.0, 40.0]).unwrap();
    let c = TensorNode::binary(&dvc, Op::Add, a, b).unwrap();
    dvc.exec_fwd(&c);
    assert_eq!(c.to_vec(), vec![11.0, 22.0, 33.0, 44.0]);
}

#[test]
fn test_storage_alloc_set_and_copy() {
    let dvc = cpu_device(1);
    let mut buf = dvc.alloc_storage(32);
    assert_eq!(buf.size(), 32);
    assert_eq!(buf.alignment(), 16);
    assert_eq!(buf.base_addr() % 16, 0);

    buf.set(0, 0);
    buf.copy_in(8, &[1, 2, 3, 4]);
    let mut out = [0u8; 6];
    buf.copy_out(6, &mut out);
    assert_eq!(out, [0, 0, 1, 2, 3, 4]);

    dvc.free_storage(buf);
}
