//! Fits y = w * x by plain gradient descent: the loss graph is recorded
//! once, and each step re-runs it with a new weight binding.

use anyhow::Result;
use ndarray::Ix0;
use symflow::{gradients, scalar_flex, variable, vector, TensorValue};

fn main() -> Result<()> {
    tracing_subscriber::fmt().init();

    let w = variable(scalar_flex(0.0f32), "w");
    let x = vector(&[1.0f32, 2.0, 3.0, 4.0]);
    let targets = vector(&[2.0f32, 4.0, 6.0, 8.0]);

    let err = &(&x * &w) - &targets;
    let loss = (&err * &err).sum();
    let grad_w = gradients(&loss, &[w.clone()], None)?.remove(0);

    let mut wv = 0.0f32;
    for step in 0..25 {
        let g = grad_w.run_with(&[("w", scalar_flex(wv).erased())])?;
        let gv = match g {
            TensorValue::F32(a) => a.into_dimensionality::<Ix0>()?.into_scalar(),
            other => anyhow::bail!("unexpected gradient dtype {}", other.dtype()),
        };
        wv -= 0.01 * gv;
        if step % 5 == 0 {
            println!("step {step:2}  w = {wv:.5}");
        }
    }
    println!("fitted w = {wv:.4} (target 2.0)");
    Ok(())
}
