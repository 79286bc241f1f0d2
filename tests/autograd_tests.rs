use ndarray::array;
use symflow::{
    curl, diff, diff_n, divergence, grad, gradients, hessian, jacobian, laplacian, matrix, scalar,
    stack, vector,
};

#[test]
fn test_gradient_of_sum_of_squares() {
    // y = sum(x * x), dy/dx = 2x
    let x = vector(&[1.0f32, 2.0]);
    let y = x.try_mul(&x).unwrap().sum();
    let g = gradients(&y, &[x.clone()], None).unwrap().remove(0);
    assert_eq!(g.to_array().unwrap(), array![2.0, 4.0]);
}

#[test]
fn test_gradient_requires_scalar_target() {
    let x = vector(&[1.0f32, 2.0]);
    let y = x.try_mul(&x).unwrap();
    assert!(gradients(&y, &[x.clone()], None).is_err());
}

#[test]
fn test_gradient_shape_matches_input() {
    let x = matrix(&[&[1.0f32, 2.0], &[3.0, 4.0]]).unwrap();
    let y = x.try_mul(&x).unwrap().sum();
    let g = gradients(&y, &[x.clone()], None).unwrap().remove(0);
    assert_eq!(g.shape().values(), x.shape().values());
    assert_eq!(g.to_array2().unwrap(), array![[2.0, 4.0], [6.0, 8.0]]);
}

#[test]
fn test_gradient_of_matmul() {
    // y = sum(x * w); grad wrt w is x^T broadcast over the output columns.
    let x = matrix(&[&[1.0f32, 2.0]]).unwrap();
    let w = matrix(&[&[0.5f32, 0.1], &[0.2, 0.4]]).unwrap();
    let y = x.matmul(&w).unwrap().sum();
    let g = gradients(&y, &[w.clone()], None).unwrap().remove(0);
    assert_eq!(g.to_array2().unwrap(), array![[1.0, 1.0], [2.0, 2.0]]);
}

#[test]
fn test_branching_gradients_accumulate() {
    //    x ---[identity]---+
    //      \               |
    //       --[ReLU]-------+--- y = sum(x + ReLU(x))
    let x = vector(&[-1.0f32, 2.0]);
    let y = x.try_add(&x.relu()).unwrap().sum();
    let g = gradients(&y, &[x.clone()], None).unwrap().remove(0);
    assert_eq!(g.to_array().unwrap(), array![1.0, 2.0]);
}

#[test]
fn test_diamond_topology() {
    //      x
    //    /   \
    //  relu  sigmoid
    //    \   /
    //      y
    let x = vector(&[1.0f32, 1.0]);
    let y = x.relu().try_add(&x.sigmoid()).unwrap().sum();
    let g = gradients(&y, &[x.clone()], None).unwrap().remove(0);
    let gv = g.to_array().unwrap();
    let s = 1.0 / (1.0 + (-1.0f32).exp());
    let expected = 1.0 + s * (1.0 - s);
    assert!((gv[0] - expected).abs() < 1e-6);
}

#[test]
fn test_unreached_input_gets_a_zero_gradient() {
    let x = vector(&[1.0f32, 2.0]);
    let unused = vector(&[5.0f32, 6.0]);
    let y = x.sum();
    let gs = gradients(&y, &[x.clone(), unused.clone()], None).unwrap();
    assert_eq!(gs[1].to_array().unwrap(), array![0.0, 0.0]);
}

#[test]
fn test_gradient_of_product() {
    let x = vector(&[1.0f32, 2.0, 3.0]);
    let g = gradients(&x.prod(), &[x.clone()], None).unwrap().remove(0);
    assert_eq!(g.to_array().unwrap(), array![6.0, 3.0, 2.0]);
}

#[test]
fn test_custom_seed() {
    let x = vector(&[1.0f32, 2.0, 3.0]);
    let y = x.sum();
    let dy = scalar(2.0f32);
    let g = gradients(&y, &[x.clone()], Some(&dy)).unwrap().remove(0);
    assert_eq!(g.to_array().unwrap(), array![2.0, 2.0, 2.0]);
}

#[test]
fn test_gradient_subgraph_is_memoized_per_triple() {
    let x = vector(&[1.0f32, 2.0]);
    let y = x.try_mul(&x).unwrap().sum();
    let gs = gradients(&y, &[x.clone()], None).unwrap();
    let g = &gs[0];
    // Two parents of the same gradient expression share one subgraph.
    let total = g.try_add(g).unwrap();
    assert_eq!(total.to_array().unwrap(), array![4.0, 8.0]);
}

#[test]
fn test_diff_of_cubic() {
    let cube = |x: &symflow::Expr<f32>| x.try_mul(x)?.try_mul(x);
    let at = scalar(2.0f32);
    assert_eq!(diff(cube, &at).unwrap().to_scalar().unwrap(), 12.0);
    assert_eq!(diff_n(0, cube, &at).unwrap().to_scalar().unwrap(), 8.0);
    assert_eq!(diff_n(2, cube, &at).unwrap().to_scalar().unwrap(), 12.0);
    assert_eq!(diff_n(3, cube, &at).unwrap().to_scalar().unwrap(), 6.0);
}

#[test]
fn test_grad_of_scalar_field() {
    let field = |v: &symflow::Expr<f32>| Ok(v.try_mul(v)?.sum());
    let at = vector(&[1.0f32, 2.0]);
    let g = grad(field, &at).unwrap();
    assert_eq!(g.to_array().unwrap(), array![2.0, 4.0]);
}

#[test]
fn test_jacobian_of_elementwise_square() {
    let f = |v: &symflow::Expr<f32>| v.try_mul(v);
    let at = vector(&[1.0f32, 2.0]);
    let j = jacobian(f, &at).unwrap();
    assert_eq!(j.shape().values(), Some(vec![2, 2]));
    assert_eq!(j.to_array2().unwrap(), array![[2.0, 0.0], [0.0, 4.0]]);
}

#[test]
fn test_hessian_of_sum_of_squares() {
    let f = |v: &symflow::Expr<f32>| Ok(v.try_mul(v)?.sum());
    let at = vector(&[1.0f32, 2.0]);
    let h = hessian(f, &at).unwrap();
    assert_eq!(h.to_array2().unwrap(), array![[2.0, 0.0], [0.0, 2.0]]);
}

#[test]
fn test_laplacian_of_sum_of_squares() {
    let f = |v: &symflow::Expr<f32>| Ok(v.try_mul(v)?.sum());
    let at = vector(&[3.0f32, -1.0]);
    assert_eq!(laplacian(f, &at).unwrap().to_scalar().unwrap(), 4.0);
}

#[test]
fn test_divergence_of_elementwise_square() {
    let f = |v: &symflow::Expr<f32>| v.try_mul(v);
    let at = vector(&[1.0f32, 2.0]);
    assert_eq!(divergence(f, &at).unwrap().to_scalar().unwrap(), 6.0);
}

#[test]
fn test_curl_of_rotated_identity() {
    // F(x, y, z) = (z, x, y) has curl (1, 1, 1) everywhere.
    let f = |v: &symflow::Expr<f32>| {
        stack(&[v.item(2)?, v.item(0)?, v.item(1)?], 0)
    };
    let at = vector(&[0.5f32, -2.0, 7.0]);
    let c = curl(f, &at).unwrap();
    assert_eq!(c.to_array().unwrap(), array![1.0, 1.0, 1.0]);
}

#[test]
fn test_second_order_through_transcendentals() {
    // f(x) = sin(x); f''(x) = -sin(x)
    let f = |x: &symflow::Expr<f32>| Ok(x.sin());
    let at = scalar(1.0f32);
    let d2 = diff_n(2, f, &at).unwrap().to_scalar().unwrap();
    assert!((d2 + 1.0f32.sin()).abs() < 1e-6);
}
