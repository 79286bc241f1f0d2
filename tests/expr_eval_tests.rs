use ndarray::{array, Array3, Array4};
use symflow::{
    decode_jpeg, eval2, eval3, from_tensor, matrix, scalar, scalar_flex, shape, stack, tensor3,
    truncated_normal, vector, Ctxt, SliceSpec, StatusCode, TensorValue,
};

#[test]
fn test_matmul_values() {
    let a = matrix(&[&[1.0f32, 2.0], &[3.0, 4.0]]).unwrap();
    let b = matrix(&[&[5.0f32], &[6.0]]).unwrap();
    let y = a.matmul(&b).unwrap();
    assert_eq!(y.shape().values(), Some(vec![2, 1]));
    assert_eq!(y.to_array2().unwrap(), array![[17.0], [39.0]]);
}

#[test]
fn test_matmul_inner_dim_mismatch() {
    let a = matrix(&[&[1.0f32, 2.0]]).unwrap();
    let b = matrix(&[&[1.0f32, 2.0]]).unwrap();
    assert!(a.matmul(&b).is_err());
}

#[test]
fn test_sum_to_scalar() {
    let v = vector(&[1.0f32, 2.0, 3.0, 4.0]);
    assert_eq!(v.sum().to_scalar().unwrap(), 10.0);
}

#[test]
fn test_sum_along_axis() {
    let m = matrix(&[&[1.0f32, 2.0], &[3.0, 4.0]]).unwrap();
    let s = m.reduce_sum(Some(&[0]), false).unwrap();
    assert_eq!(s.shape().values(), Some(vec![2]));
    assert_eq!(s.to_array().unwrap(), array![4.0, 6.0]);
}

#[test]
fn test_keep_dims_reduction_keeps_declared_shape() {
    let m = matrix(&[&[1.0f32, 2.0], &[3.0, 4.0]]).unwrap();
    let s = m.reduce_sum(Some(&[1]), true).unwrap();
    assert_eq!(s.shape().values(), Some(vec![2, 2]));
    assert_eq!(s.run().unwrap().shape(), &[2, 1]);
}

#[test]
fn test_flex_scalar_broadcasts_into_vector() {
    let a = scalar_flex(3.0f32);
    let b = vector(&[1.0f32, 2.0, 3.0]);
    let sum = a.try_add(&b).unwrap();
    // The flex tail on `a` was solved during unification.
    assert_eq!(a.shape().rank(), Some(1));
    assert_eq!(sum.to_array().unwrap(), array![4.0, 5.0, 6.0]);
}

#[test]
fn test_closed_scalar_does_not_broadcast() {
    let a = scalar(3.0f32);
    let b = vector(&[1.0f32, 2.0]);
    assert!(a.try_add(&b).is_err());
}

#[test]
fn test_constant_round_trip() {
    let t = TensorValue::F32(array![[1.0f32, 2.0], [3.0, 4.0]].into_dyn());
    let e = from_tensor::<f32>(t.clone()).unwrap();
    assert_eq!(e.run().unwrap(), t);
    assert_eq!(e.get_value().unwrap(), array![[1.0f32, 2.0], [3.0, 4.0]].into_dyn());
}

#[test]
fn test_from_tensor_rejects_wrong_tag() {
    let t = TensorValue::F32(array![1.0f32].into_dyn());
    assert!(from_tensor::<i32>(t).is_err());
}

#[test]
fn test_jagged_matrix_is_rejected() {
    assert!(matrix(&[&[1.0f32, 2.0], &[3.0]]).is_err());
}

#[test]
fn test_cost_is_monotonic() {
    let x = vector(&[1.0f32, 2.0]);
    assert_eq!(x.cost(), 0);
    let y = x.try_add(&x).unwrap();
    let z = y.try_mul(&y).unwrap();
    assert!(y.cost() > x.cost());
    assert!(z.cost() > y.cost());
}

#[test]
fn test_lowering_is_memoized_per_identity() {
    let x = vector(&[1.0f32, 2.0]);
    let y = x.try_add(&x).unwrap();
    let mut ctxt = Ctxt::new();
    let first = ctxt.lower(&y.erased()).unwrap();
    let second = ctxt.lower(&y.erased()).unwrap();
    assert_eq!(first, second);
    // One constant plus one add: `x` lowered once despite two parents.
    assert_eq!(ctxt.graph().len(), 2);
}

#[test]
fn test_two_equal_constants_are_distinct_nodes() {
    let a = scalar(1.0f32);
    let b = scalar(1.0f32);
    let y = a.try_add(&b).unwrap();
    let mut ctxt = Ctxt::new();
    ctxt.lower(&y.erased()).unwrap();
    assert_eq!(ctxt.graph().len(), 3);
}

#[test]
fn test_cast_between_numeric_types() {
    let v = vector(&[1i32, 2, 3]);
    let f = v.cast::<f32>();
    assert_eq!(f.to_array().unwrap(), array![1.0f32, 2.0, 3.0]);
}

#[test]
fn test_reshape() {
    let v = vector(&[1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0]);
    let m = v.reshape(&shape![2, 3]);
    assert_eq!(
        m.to_array2().unwrap(),
        array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]
    );
}

#[test]
fn test_broadcast_to() {
    let v = vector(&[1.0f32, 2.0]);
    let m = v.broadcast_to(&shape![3, 2]);
    assert_eq!(m.run().unwrap().shape(), &[3, 2]);
}

#[test]
fn test_slice_single_index_squeezes() {
    let v = vector(&[1.0f32, 2.0, 3.0, 4.0]);
    assert_eq!(v.item(2).unwrap().to_scalar().unwrap(), 3.0);

    let m = matrix(&[&[1.0f32, 2.0], &[3.0, 4.0]]).unwrap();
    let row = m.slice(&[SliceSpec::Idx(1)]).unwrap();
    assert_eq!(row.shape().values(), Some(vec![2]));
    assert_eq!(row.to_array().unwrap(), array![3.0, 4.0]);
}

#[test]
fn test_slice_range() {
    let v = vector(&[1.0f32, 2.0, 3.0, 4.0]);
    let mid = v.slice(&[(1i64..3).into()]).unwrap();
    assert_eq!(mid.to_array().unwrap(), array![2.0, 3.0]);

    let tail = v.slice(&[(1i64..).into()]).unwrap();
    assert_eq!(tail.shape().values(), Some(vec![3]));
    assert_eq!(tail.to_array().unwrap(), array![2.0, 3.0, 4.0]);
}

#[test]
fn test_slice_unknown_endpoint_infers_length() {
    let x = truncated_normal::<f32>(shape![_, 4]);
    let s = x
        .slice(&[SliceSpec::Range { begin: Some(0), end: Some(-1) }])
        .unwrap();
    assert_eq!(s.shape().rank(), Some(2));
    assert!(!s.shape().dims()[0].is_resolved());
    assert_eq!(s.shape().dims()[1].value(), Some(4));
}

#[test]
fn test_slice_out_of_range() {
    let v = vector(&[1.0f32, 2.0]);
    assert!(v.item(5).is_err());
    assert!(v.slice(&[SliceSpec::Range { begin: Some(0), end: Some(7) }]).is_err());
}

#[test]
fn test_stack() {
    let a = vector(&[1.0f32, 2.0]);
    let b = vector(&[3.0f32, 4.0]);
    let rows = stack(&[a.clone(), b.clone()], 0).unwrap();
    assert_eq!(rows.shape().values(), Some(vec![2, 2]));
    assert_eq!(rows.to_array2().unwrap(), array![[1.0, 2.0], [3.0, 4.0]]);

    let cols = stack(&[a, b], 1).unwrap();
    assert_eq!(cols.to_array2().unwrap(), array![[1.0, 3.0], [2.0, 4.0]]);
}

#[test]
fn test_stack_unifies_member_shapes() {
    let a = vector(&[1.0f32, 2.0]);
    let b = vector(&[1.0f32, 2.0, 3.0]);
    assert!(stack(&[a, b], 0).is_err());
}

#[test]
fn test_expand_dims_inserts_open_dim() {
    let v = vector(&[1.0f32, 2.0, 3.0]);
    let e = v.expand_dims(0).unwrap();
    assert_eq!(e.shape().rank(), Some(2));
    assert_eq!(e.run().unwrap().shape(), &[1, 3]);
}

#[test]
fn test_diag_part() {
    let m = matrix(&[&[1.0f32, 2.0], &[3.0, 4.0]]).unwrap();
    let d = m.diag_part().unwrap();
    assert_eq!(d.to_array().unwrap(), array![1.0, 4.0]);
}

#[test]
fn test_diag_part_rejects_odd_rank() {
    let t = tensor3(Array3::<f32>::zeros((2, 2, 2)));
    assert!(t.diag_part().is_err());
}

#[test]
fn test_diag_part_rejects_unpaired_dims() {
    let m = matrix(&[&[1.0f32, 2.0, 3.0], &[4.0, 5.0, 6.0]]).unwrap();
    assert!(m.diag_part().is_err());
}

#[test]
fn test_moments_pair() {
    let m = matrix(&[&[1.0f32, 2.0], &[3.0, 4.0]]).unwrap();
    let (mean, variance) = m.moments(&[0, 1], false).unwrap();
    let (mv, vv) = eval2(&mean, &variance).unwrap();
    assert_eq!(mv.into_dimensionality::<ndarray::Ix0>().unwrap().into_scalar(), 2.5);
    assert_eq!(vv.into_dimensionality::<ndarray::Ix0>().unwrap().into_scalar(), 1.25);
}

#[test]
fn test_eval3_shares_one_run() {
    let x = vector(&[1.0f32, 2.0]);
    let a = x.try_add(&x).unwrap();
    let b = x.try_mul(&x).unwrap();
    let (xv, av, bv) = eval3(&x, &a, &b).unwrap();
    assert_eq!(xv, array![1.0f32, 2.0].into_dyn());
    assert_eq!(av, array![2.0f32, 4.0].into_dyn());
    assert_eq!(bv, array![1.0f32, 4.0].into_dyn());
}

#[test]
fn test_truncated_normal_stays_within_two_sigma() {
    let x = truncated_normal::<f32>(shape![64]);
    let v = x.to_array().unwrap();
    assert_eq!(v.len(), 64);
    assert!(v.iter().all(|a| a.abs() <= 2.0));
}

#[test]
fn test_pixel_is_a_one_pixel_image() {
    let p = symflow::pixel(0.1f32, 0.2, 0.3);
    assert_eq!(p.shape().values(), Some(vec![1, 1, 3]));
    assert_eq!(p.to_array3().unwrap().into_dyn(), array![[[0.1f32, 0.2, 0.3]]].into_dyn());
}

#[test]
fn test_batch_stacks_a_leading_dim() {
    let a = vector(&[1.0f32, 2.0]);
    let b = vector(&[3.0f32, 4.0]);
    let batched = symflow::batch(&[a, b]).unwrap();
    assert_eq!(batched.shape().values(), Some(vec![2, 2]));
}

#[test]
fn test_tensor4_helper() {
    let t = symflow::tensor4(Array4::<f32>::zeros((2, 3, 4, 5)));
    assert_eq!(t.shape().values(), Some(vec![2, 3, 4, 5]));
}

#[test]
fn test_decode_jpeg_shape_contract() {
    let bytes = scalar(String::from("not really a jpeg"));
    let img = decode_jpeg(&bytes, 3).unwrap();
    assert_eq!(img.shape().rank(), Some(3));
    assert!(!img.shape().dims()[0].is_resolved());
    assert_eq!(img.shape().dims()[2].value(), Some(3));
    // The reference engine has no decoder; the shape contract still holds.
    let err = img.run().unwrap_err();
    assert_eq!(err.status_code(), StatusCode::Unimplemented);
}

#[test]
fn test_decode_jpeg_rejects_non_scalar_input() {
    let bytes = vector(&[String::from("a"), String::from("b")]);
    assert!(decode_jpeg(&bytes, 3).is_err());
}

#[test]
fn test_display_is_eager_only_below_the_gradient_cost() {
    let s = scalar(1.5f32);
    assert_eq!(s.to_string(), "1.5");

    let w = symflow::variable(scalar(1.0f32), "w");
    assert_eq!(w.to_string(), "float32[]");
}
