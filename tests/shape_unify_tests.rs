use symflow::{shape, Dim, SfError, Shape};

#[test]
fn test_unify_reflexive_adds_no_solutions() {
    let s = Shape::closed(vec![Dim::Known(2), Dim::inferred()]);
    Shape::unify("refl", &s, &s).unwrap();
    assert_eq!(s.rank(), Some(2));
    assert!(!s.dims()[1].is_resolved());
}

#[test]
fn test_unify_symmetric() {
    for flip in [false, true] {
        let a = Shape::closed(vec![Dim::Known(4), Dim::inferred()]);
        let b = Shape::closed(vec![Dim::inferred().times(2), Dim::Known(5)]);
        let result = if flip {
            Shape::unify("sym", &b, &a)
        } else {
            Shape::unify("sym", &a, &b)
        };
        result.unwrap();
        assert_eq!(a.values(), Some(vec![4, 5]));
        assert_eq!(b.values(), Some(vec![4, 5]));
    }
}

#[test]
fn test_partial_dims_solve_through_multiples() {
    // [Known 4, ?] against [?*2, Known 5]: the multiplied var is forced to
    // 2 and the open dim to 5.
    let inner = Dim::inferred();
    let a = Shape::closed(vec![Dim::Known(4), Dim::inferred()]);
    let b = Shape::closed(vec![inner.times(2), Dim::Known(5)]);
    Shape::unify("s6", &a, &b).unwrap();
    assert_eq!(inner.value(), Some(2));
    assert_eq!(a.values(), Some(vec![4, 5]));
}

#[test]
fn test_indivisible_multiple_reports_reason() {
    let b = Shape::closed(vec![Dim::inferred().times(2)]);
    let err = Shape::unify("conv", &Shape::known(&[7]), &b).unwrap_err();
    match err {
        SfError::DimMismatch { op, reason, .. } => {
            assert_eq!(op, "conv");
            assert_eq!(reason, "not divisible");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_flex_scalar_promotes() {
    let a = Shape::any();
    let b = Shape::known(&[2, 3]);
    Shape::unify("add", &a, &b).unwrap();
    assert_eq!(a.values(), Some(vec![2, 3]));
}

#[test]
fn test_closed_rank_mismatch() {
    let err = Shape::unify("matmul", &Shape::known(&[2, 3]), &Shape::known(&[2])).unwrap_err();
    assert!(matches!(err, SfError::ShapeMismatch { .. }));
}

#[test]
fn test_min_rank_on_short_closed_shape_fails() {
    assert!(Shape::min_rank("op", &Shape::known(&[2]), 2).is_err());
    Shape::min_rank("op", &Shape::known(&[2, 3]), 2).unwrap();
}

#[test]
fn test_min_rank_extends_open_shape() {
    let open = Shape::flexible(vec![Dim::Known(1)]);
    Shape::min_rank("op", &open, 3).unwrap();
    assert!(open.rank().is_none());
    assert_eq!(open.dims().len(), 3);
}

#[test]
fn test_solve_once_second_conflict_fails() {
    let v = Dim::inferred();
    Dim::unify("op", &v, &Dim::Known(3)).unwrap();
    assert_eq!(v.value(), Some(3));
    // A matching value is a no-op; a conflicting one is a mismatch.
    Dim::unify("op", &v, &Dim::Known(3)).unwrap();
    assert!(Dim::unify("op", &v, &Dim::Known(4)).is_err());
}

#[test]
fn test_divisor_dims_resolve_with_their_source() {
    let h = Dim::inferred();
    let out = h.ceil_div(2);
    assert!(!out.is_resolved());
    Dim::unify("op", &h, &Dim::Known(9)).unwrap();
    assert_eq!(out.value(), Some(5));
}

#[test]
fn test_shape_macro_forms() {
    assert_eq!(shape![].rank(), Some(0));
    let s = shape![2, _, 3];
    assert_eq!(s.rank(), Some(3));
    assert!(!s.dims()[1].is_resolved());
    let open = shape![2; ..];
    assert!(open.rank().is_none());
}
