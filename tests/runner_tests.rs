use ndarray::array;
use symflow::{
    scalar, scalar_flex, variable, vector, CpuBackend, DType, Graph, OpKind, Session, SfError,
    Status, StatusCode, TensorValue,
};

fn v(values: &[f32]) -> TensorValue {
    TensorValue::F32(ndarray::ArrayD::from_shape_vec(ndarray::IxDyn(&[values.len()]), values.to_vec()).unwrap())
}

fn session_with_product() -> Session {
    // y = x * c, with x a placeholder and c a constant.
    let mut graph = Graph::new();
    let x = graph.placeholder(DType::Float32, "x").unwrap();
    let c = graph.constant(v(&[2.0, 3.0])).unwrap();
    graph.add_op(OpKind::Mul, vec![x, c], Some("y")).unwrap();
    Session::new(graph, Box::new(CpuBackend))
}

#[test]
fn test_runner_feeds_and_fetches_by_name() {
    let session = session_with_product();
    let mut runner = session.runner();
    runner.add_input_named("x", v(&[4.0, 5.0])).unwrap();
    runner.fetch_named("y:0").unwrap();
    let out = runner.run().unwrap();
    assert_eq!(out, vec![v(&[8.0, 15.0])]);
}

#[test]
fn test_runner_single_fetch_clears_previous_fetches() {
    let session = session_with_product();
    let y = session.graph().operation_by_name("y").unwrap().output(0);
    let x = session.graph().operation_by_name("x").unwrap().output(0);
    let mut runner = session.runner();
    runner.add_input(x, v(&[1.0, 1.0]));
    runner.fetch(x);
    let out = runner.run_single(y).unwrap();
    assert_eq!(out, v(&[2.0, 3.0]));
}

#[test]
fn test_runner_rejects_malformed_fetch_names() {
    let session = session_with_product();
    let mut runner = session.runner();
    assert!(matches!(runner.fetch_named("y:first"), Err(SfError::ParseError(_))));
    let err = runner.fetch_named("absent").unwrap_err();
    assert_eq!(err.status_code(), StatusCode::NotFound);
}

#[test]
fn test_unfed_placeholder_is_a_backend_error() {
    let session = session_with_product();
    let y = session.graph().operation_by_name("y").unwrap().output(0);
    let err = session.run(&[], &[y], &[]).unwrap_err();
    assert_eq!(err.status_code(), StatusCode::InvalidArgument);
}

#[test]
fn test_run_with_status_fills_the_sink() {
    let session = session_with_product();
    let y = session.graph().operation_by_name("y").unwrap().output(0);
    let mut status = Status::new();
    assert!(session.run_with_status(&[], &[y], &[], &mut status).is_none());
    assert!(!status.is_ok());
    assert_eq!(status.code(), StatusCode::InvalidArgument);

    let x = session.graph().operation_by_name("x").unwrap().output(0);
    let values = session.run_with_status(&[(x, v(&[1.0, 2.0]))], &[y], &[], &mut status);
    assert!(status.is_ok());
    assert_eq!(values.unwrap(), vec![v(&[2.0, 6.0])]);
}

#[test]
fn test_closed_session_reports_disposed_handle() {
    let session = session_with_product();
    let y = session.graph().operation_by_name("y").unwrap().output(0);
    session.close();
    assert!(matches!(session.run(&[], &[y], &[]), Err(SfError::DisposedHandle(_))));
    assert!(session.devices().is_err());
}

#[test]
fn test_devices() {
    let session = session_with_product();
    let devices = session.devices().unwrap();
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].device_type, "CPU");
}

#[test]
fn test_saved_model_slot_is_unimplemented_here() {
    let session = session_with_product();
    let err = session
        .load_saved_model(std::path::Path::new("/tmp/model"), &["serve"])
        .unwrap_err();
    assert_eq!(err.status_code(), StatusCode::Unimplemented);
}

#[test]
fn test_partial_run_accumulates_feeds() {
    // sum = x + y, prod = x * y; feed x and y across two steps.
    let mut graph = Graph::new();
    let x = graph.placeholder(DType::Float32, "x").unwrap();
    let y = graph.placeholder(DType::Float32, "y").unwrap();
    let sum = graph.add_op(OpKind::Add, vec![x, y], Some("sum")).unwrap();
    let prod = graph.add_op(OpKind::Mul, vec![x, y], Some("prod")).unwrap();
    let session = Session::new(graph, Box::new(CpuBackend));

    let token = session.partial_run_setup(&[x, y], &[sum, prod], &[]).unwrap();
    let first = session.partial_run(&token, &[(x, v(&[1.0, 2.0]))], &[]).unwrap();
    assert!(first.is_empty());
    let second = session
        .partial_run(&token, &[(y, v(&[10.0, 20.0]))], &[sum, prod])
        .unwrap();
    assert_eq!(second, vec![v(&[11.0, 22.0]), v(&[10.0, 40.0])]);
}

#[test]
fn test_partial_run_validates_declared_ports() {
    let mut graph = Graph::new();
    let x = graph.placeholder(DType::Float32, "x").unwrap();
    let y = graph.placeholder(DType::Float32, "y").unwrap();
    let sum = graph.add_op(OpKind::Add, vec![x, y], Some("sum")).unwrap();
    let session = Session::new(graph, Box::new(CpuBackend));

    let token = session.partial_run_setup(&[x], &[sum], &[]).unwrap();
    assert!(session.partial_run(&token, &[(y, v(&[1.0]))], &[]).is_err());
    assert!(session.partial_run(&token, &[], &[x]).is_err());
}

#[test]
fn test_partial_run_token_releases_once() {
    let session = session_with_product();
    let x = session.graph().operation_by_name("x").unwrap().output(0);
    let y = session.graph().operation_by_name("y").unwrap().output(0);
    let token = session.partial_run_setup(&[x], &[y], &[]).unwrap();
    token.release();
    token.release();
    assert!(matches!(
        session.partial_run(&token, &[(x, v(&[1.0, 1.0]))], &[y]),
        Err(SfError::DisposedHandle(_))
    ));
}

#[test]
fn test_variable_uses_default_without_binding() {
    let w = variable(scalar(1.5f32), "w");
    let y = w.try_mul(&scalar(2.0f32)).unwrap();
    assert_eq!(y.to_scalar().unwrap(), 3.0);
}

#[test]
fn test_variable_binding_replaces_default() {
    let w = variable(scalar_flex(0.0f32), "w");
    let x = vector(&[1.0f32, 2.0, 3.0]);
    let y = x.try_mul(&w).unwrap();
    let out = y.run_with(&[("w", scalar_flex(2.0f32).erased())]).unwrap();
    assert_eq!(out, v(&[2.0, 4.0, 6.0]));
}

#[test]
fn test_variable_binding_with_wrong_dtype_falls_back() {
    let w = variable(scalar(3.0f32), "w");
    let y = w.try_mul(&scalar(2.0f32)).unwrap();
    let out = y.run_with(&[("w", scalar(7i32).erased())]).unwrap();
    assert_eq!(
        out,
        TensorValue::F32(ndarray::ArrayD::from_elem(ndarray::IxDyn(&[]), 6.0f32))
    );
}

#[test]
fn test_variable_nodes_are_name_scoped() {
    let w = variable(scalar(1.0f32), "weights");
    let mut ctxt = symflow::Ctxt::new();
    ctxt.lower(&w.erased()).unwrap();
    assert!(ctxt.graph().operation_by_name("weights/Const").is_some());
}

#[test]
fn test_feeds_override_any_node() {
    let session = session_with_product();
    let graph = session.graph();
    let c = graph.operation_by_name("Const").unwrap().output(0);
    let x = graph.operation_by_name("x").unwrap().output(0);
    let y = graph.operation_by_name("y").unwrap().output(0);
    let out = session
        .run(&[(x, v(&[1.0, 1.0])), (c, v(&[5.0, 5.0]))], &[y], &[])
        .unwrap();
    assert_eq!(out, vec![v(&[5.0, 5.0])]);
}

#[test]
fn test_output_index_out_of_range() {
    let session = session_with_product();
    let y = session.graph().operation_by_name("y").unwrap().output(3);
    let x = session.graph().operation_by_name("x").unwrap().output(0);
    let err = session.run(&[(x, v(&[1.0, 1.0]))], &[y], &[]).unwrap_err();
    assert_eq!(err.status_code(), StatusCode::InvalidArgument);
}

#[test]
fn test_eval_of_pure_constants_matches_array() {
    let x = vector(&[1.0f32, 2.0]);
    assert_eq!(symflow::eval(&x).unwrap(), array![1.0f32, 2.0].into_dyn());
}
