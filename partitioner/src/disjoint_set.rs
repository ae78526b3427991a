/// Union-find over `0..n` with path halving. Unions attach the larger root under the smaller,
/// so a set's representative is always its lowest member.
#[derive(Debug, Clone)]
pub struct DisjointSet {
    parents: Vec<u32>,
}

impl DisjointSet {
    pub fn new(size: usize) -> Self {
        Self {
            parents: (0..size as u32).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.parents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parents.is_empty()
    }

    pub fn find(&mut self, mut i: u32) -> u32 {
        while self.parents[i as usize] != i {
            let grandparent = self.parents[self.parents[i as usize] as usize];
            self.parents[i as usize] = grandparent;
            i = grandparent;
        }
        i
    }

    pub fn union(&mut self, a: u32, b: u32) {
        let a = self.find(a);
        let b = self.find(b);
        match a.cmp(&b) {
            std::cmp::Ordering::Less => self.parents[b as usize] = a,
            std::cmp::Ordering::Greater => self.parents[a as usize] = b,
            std::cmp::Ordering::Equal => (),
        }
    }

    /// Representative of every element.
    pub fn roots(&mut self) -> Vec<u32> {
        (0..self.parents.len() as u32).map(|i| self.find(i)).collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_union_find() {
        let mut set = DisjointSet::new(6);
        set.union(4, 5);
        set.union(5, 2);
        set.union(0, 1);

        assert_eq!(set.roots(), vec![0, 0, 2, 3, 2, 2]);
    }
}
