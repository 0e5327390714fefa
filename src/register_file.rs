/// Banked register storage: `count` registers, each holding one value per element (lane).
///
/// Registers are laid out register-major so that one register across all
/// lanes is a contiguous slice.
pub trait RegisterFile<T: Copy> {
    fn new(num_elems: usize, count: usize, default: T) -> Self;

    fn num_elems(&self) -> usize;

    fn count(&self) -> usize;

    fn get(&self, elem: usize, idx: usize) -> T;

    fn set(&mut self, elem: usize, idx: usize, val: T);

    fn get_vec(&self, idx: usize) -> &[T];

    /// Writes the elements that carry a value; `None` leaves the cell untouched.
    fn set_vec(&mut self, idx: usize, vals: &[Option<T>]);

    /// All registers of one element, in register order.
    fn elem_regs(&self, elem: usize) -> Vec<T> {
        (0..self.count()).map(|idx| self.get(elem, idx)).collect()
    }
}

#[derive(Debug, Clone)]
pub struct RegisterFileImpl<T: Copy> {
    num_elems: usize,
    count: usize,
    regs: Vec<T>,
}

impl<T: Copy> RegisterFile<T> for RegisterFileImpl<T> {
    fn new(num_elems: usize, count: usize, default: T) -> Self {
        RegisterFileImpl {
            num_elems,
            count,
            regs: vec![default; num_elems * count],
        }
    }

    fn num_elems(&self) -> usize {
        self.num_elems
    }

    fn count(&self) -> usize {
        self.count
    }

    fn get(&self, elem: usize, idx: usize) -> T {
        self.regs[self.num_elems * idx + elem]
    }

    fn set(&mut self, elem: usize, idx: usize, val: T) {
        self.regs[self.num_elems * idx + elem] = val
    }

    fn get_vec(&self, idx: usize) -> &[T] {
        let beg = self.num_elems * idx;
        let end = self.num_elems * (idx + 1);
        &self.regs[beg..end]
    }

    fn set_vec(&mut self, idx: usize, vals: &[Option<T>]) {
        for (elem, val) in vals.iter().enumerate().take(self.num_elems) {
            if let Some(val) = *val {
                self.set(elem, idx, val);
            }
        }
    }
}
