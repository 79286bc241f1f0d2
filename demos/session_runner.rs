//! Drives a session directly through the fluent runner: placeholders are
//! fed by name, outputs fetched by `op:idx` strings, and the same graph is
//! stepped incrementally through a partial run.

use anyhow::Result;
use ndarray::IxDyn;
use symflow::{CpuBackend, DType, Graph, OpKind, Session, TensorValue};

fn tensor(values: &[f32]) -> TensorValue {
    TensorValue::F32(
        ndarray::ArrayD::from_shape_vec(IxDyn(&[values.len()]), values.to_vec())
            .expect("literal is self-consistent"),
    )
}

fn main() -> Result<()> {
    tracing_subscriber::fmt().init();

    let mut graph = Graph::new();
    let x = graph.placeholder(DType::Float32, "x")?;
    let y = graph.placeholder(DType::Float32, "y")?;
    let sum = graph.add_op(OpKind::Add, vec![x, y], Some("sum"))?;
    let prod = graph.add_op(OpKind::Mul, vec![x, y], Some("prod"))?;
    let session = Session::new(graph, Box::new(CpuBackend));

    for device in session.devices()? {
        println!("device: {} ({})", device.name, device.device_type);
    }

    let mut runner = session.runner();
    runner.add_input_named("x", tensor(&[1.0, 2.0]))?;
    runner.add_input_named("y", tensor(&[10.0, 20.0]))?;
    runner.fetch_named("sum:0")?;
    runner.fetch_named("prod")?;
    for (name, value) in ["sum", "prod"].iter().zip(runner.run()?) {
        println!("{name} = {value}");
    }

    // The same outputs, fed across two partial-run steps.
    let token = session.partial_run_setup(&[x, y], &[sum, prod], &[])?;
    session.partial_run(&token, &[(x, tensor(&[3.0, 4.0]))], &[])?;
    let stepped = session.partial_run(&token, &[(y, tensor(&[5.0, 6.0]))], &[sum, prod])?;
    println!("partial sum  = {}", stepped[0]);
    println!("partial prod = {}", stepped[1]);
    token.release();

    Ok(())
}
