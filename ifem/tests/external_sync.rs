use std::cell::RefCell;
use std::rc::Rc;

use ifem::comm::{Communicator, LocalComm, MinLoc, RecvHandle};
use ifem::mesh::QuadMesh;
use ifem::sync::ExternalCoupling;
use ifem::test_utils::default_parameters;
use ifem::Time;

/// Communicator double standing in for the external program: collective
/// maxima return scripted values, everything else behaves like the local
/// transport.
struct ScriptedComm {
    inner: LocalComm,
    max_ints: RefCell<Vec<i64>>,
    max_floats: RefCell<Vec<f64>>,
    active: bool,
}

impl ScriptedComm {
    fn new(max_ints: Vec<i64>, max_floats: Vec<f64>, active: bool) -> Self {
        ScriptedComm {
            inner: LocalComm::new(),
            max_ints: RefCell::new(max_ints),
            max_floats: RefCell::new(max_floats),
            active,
        }
    }
}

impl Communicator for ScriptedComm {
    fn rank(&self) -> usize {
        0
    }
    fn size(&self) -> usize {
        2
    }
    fn sum(&self, local: f64) -> f64 {
        local
    }
    fn max(&self, local: f64) -> f64 {
        let scripted = self.max_floats.borrow_mut().pop().unwrap_or(0.0);
        scripted.max(local)
    }
    fn max_int(&self, local: i64) -> i64 {
        let scripted = self.max_ints.borrow_mut().pop().unwrap_or(0);
        scripted.max(local)
    }
    fn all(&self, local: bool) -> bool {
        local && self.active
    }
    fn min_loc(&self, local: f64) -> MinLoc {
        MinLoc {
            value: local,
            rank: 0,
        }
    }
    fn broadcast_index(&self, _root: usize, value: usize) -> usize {
        value
    }
    fn send(&self, dest: usize, tag: i32, data: &[f64]) {
        self.inner.send(0, tag, data);
        let _ = dest;
    }
    fn post_recv(&self, src: usize, tag: i32, len: usize) -> RecvHandle {
        self.inner.post_recv(src, tag, len)
    }
    fn wait(&self, handle: RecvHandle) -> Vec<f64> {
        self.inner.wait(handle)
    }
}

/// The external side reports a structured mesh whose interior matches the
/// local one; metadata synchronization must accept it.
#[test]
fn metadata_sync_accepts_a_matching_external_mesh() {
    let params = default_parameters();
    // Counts are popped in reverse order: nodes_one_dir, elements, nodes.
    let comm = Rc::new(ScriptedComm::new(vec![49, 36, 7], vec![], true));
    let mut coupling = ExternalCoupling::new(&params, comm).unwrap();
    let mesh = QuadMesh::subdivided_rectangle([0.0, 0.0], [1.0, 1.0], [4, 4]);
    coupling.synchronize_mesh_metadata(&mesh).unwrap();
    assert_eq!(coupling.non_ghost_nodes().len(), 25);
    assert_eq!(coupling.non_ghost_cells().len(), 16);
}

/// A mismatched interior is a fatal consistency error.
#[test]
fn metadata_sync_rejects_a_mismatched_external_mesh() {
    let params = default_parameters();
    let comm = Rc::new(ScriptedComm::new(vec![49, 36, 7], vec![], true));
    let mut coupling = ExternalCoupling::new(&params, comm).unwrap();
    let mesh = QuadMesh::subdivided_rectangle([0.0, 0.0], [1.0, 1.0], [5, 5]);
    assert!(coupling.synchronize_mesh_metadata(&mesh).is_err());
}

/// The coupling step size arrives by collective maximum and drives the
/// local clock.
#[test]
fn external_dt_drives_the_clock() {
    let params = default_parameters();
    let comm = Rc::new(ScriptedComm::new(vec![], vec![0.25, 0.5], true));
    let coupling = ExternalCoupling::new(&params, comm).unwrap();
    let mut time = Time::new(10.0, 1.0, 1, 1, 1);
    coupling.get_external_dt(&mut time);
    assert_eq!(time.get_delta_t(), 0.5);
    assert_eq!(time.get_timestep(), 1);
    coupling.get_external_dt(&mut time);
    assert_eq!(time.get_delta_t(), 0.25);
    assert!((time.current() - 0.75).abs() < 1e-14);
}
