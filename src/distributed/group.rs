//! Collective operations trait and the single-process group.

use crate::optim::Param;
use crate::Result;

/// Collective operations over the processes of one run
pub trait ProcessGroup {
    /// Rank of this process, `0..world_size`
    fn rank(&self) -> usize;

    /// Number of processes
    fn world_size(&self) -> usize;

    /// Element-wise sum across all ranks, result on every rank
    fn all_reduce_sum(&mut self, data: &mut [f32]) -> Result<()>;

    /// Replace `data` on every rank with rank 0's copy
    fn broadcast(&mut self, data: &mut Vec<f32>) -> Result<()>;

    /// Block until every rank reaches this point
    fn barrier(&mut self) -> Result<()> {
        let mut token = [0.0];
        self.all_reduce_sum(&mut token)
    }
}

/// Group of one: every collective is the identity
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LocalGroup;

impl ProcessGroup for LocalGroup {
    fn rank(&self) -> usize {
        0
    }

    fn world_size(&self) -> usize {
        1
    }

    fn all_reduce_sum(&mut self, _data: &mut [f32]) -> Result<()> {
        Ok(())
    }

    fn broadcast(&mut self, _data: &mut Vec<f32>) -> Result<()> {
        Ok(())
    }
}

/// Average gradients across ranks in a single flattened all-reduce
pub fn average_gradients(params: &mut [Param<'_>], group: &mut dyn ProcessGroup) -> Result<()> {
    let world_size = group.world_size();
    if world_size <= 1 {
        return Ok(());
    }
    let mut bucket: Vec<f32> = params.iter().flat_map(|p| p.grad.iter().copied()).collect();
    group.all_reduce_sum(&mut bucket)?;

    let scale = 1.0 / world_size as f32;
    let mut offset = 0;
    for param in params.iter_mut() {
        for (g, &summed) in param.grad.iter_mut().zip(&bucket[offset..]) {
            *g = summed * scale;
        }
        offset += param.grad.len();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr1;

    /// Pretends every other rank contributed the same values
    struct Mirror(usize);

    impl ProcessGroup for Mirror {
        fn rank(&self) -> usize {
            0
        }
        fn world_size(&self) -> usize {
            self.0
        }
        fn all_reduce_sum(&mut self, data: &mut [f32]) -> Result<()> {
            let n = self.0 as f32;
            data.iter_mut().for_each(|x| *x *= n);
            Ok(())
        }
        fn broadcast(&mut self, _data: &mut Vec<f32>) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_local_group_collectives_are_identity() {
        let mut group = LocalGroup;
        let mut data = vec![1.0, 2.0];
        group.all_reduce_sum(&mut data).unwrap();
        group.barrier().unwrap();
        assert_eq!(data, vec![1.0, 2.0]);
        assert_eq!(group.world_size(), 1);
    }

    #[test]
    fn test_average_gradients_over_identical_ranks() {
        let mut v1 = arr1(&[0.0, 0.0]);
        let mut g1 = arr1(&[1.0, 2.0]);
        let mut v2 = arr1(&[0.0]);
        let mut g2 = arr1(&[3.0]);
        {
            let mut params = vec![
                Param::new("a", v1.view_mut().into_dyn(), g1.view_mut().into_dyn()),
                Param::new("b", v2.view_mut().into_dyn(), g2.view_mut().into_dyn()),
            ];
            average_gradients(&mut params, &mut Mirror(4)).unwrap();
        }
        assert_eq!(g1, arr1(&[1.0, 2.0]));
        assert_eq!(g2, arr1(&[3.0]));
    }
}
