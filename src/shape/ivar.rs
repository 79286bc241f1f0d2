use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// A single-assignment inference cell. Created unsolved, solved at most once,
/// never reverts. Shared by value: clones point at the same cell, and
/// identity is pointer identity.
pub struct IVar<T> {
    cell: Rc<RefCell<Option<T>>>,
}

impl<T> IVar<T> {
    pub fn new() -> Self {
        Self { cell: Rc::new(RefCell::new(None)) }
    }

    pub fn is_solved(&self) -> bool {
        self.cell.borrow().is_some()
    }

    /// Assigns the solution. Unification strips solved variables before
    /// solving, so a second assignment is a bug in the caller.
    pub fn solve(&self, value: T) {
        let mut slot = self.cell.borrow_mut();
        assert!(slot.is_none(), "inference variable already solved");
        *slot = Some(value);
    }

    pub fn same(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.cell, &other.cell)
    }
}

impl<T: Clone> IVar<T> {
    pub fn solution(&self) -> Option<T> {
        self.cell.borrow().clone()
    }
}

impl<T> Clone for IVar<T> {
    fn clone(&self) -> Self {
        Self { cell: Rc::clone(&self.cell) }
    }
}

impl<T> Default for IVar<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: fmt::Debug> fmt::Debug for IVar<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.cell.borrow() {
            Some(v) => write!(f, "IVar({v:?})"),
            None => f.write_str("IVar(?)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::IVar;

    #[test]
    fn solves_once() {
        let v: IVar<u32> = IVar::new();
        assert!(!v.is_solved());
        v.solve(7);
        assert!(v.is_solved());
        assert_eq!(v.solution(), Some(7));
    }

    #[test]
    #[should_panic(expected = "already solved")]
    fn second_solve_is_a_bug() {
        let v: IVar<u32> = IVar::new();
        v.solve(1);
        v.solve(2);
    }

    #[test]
    fn clones_share_the_cell() {
        let v: IVar<u32> = IVar::new();
        let w = v.clone();
        v.solve(3);
        assert_eq!(w.solution(), Some(3));
        assert!(v.same(&w));
        assert!(!v.same(&IVar::new()));
    }
}
