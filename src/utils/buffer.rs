// -------------------------------------------------------------------------------------------------

/// Set all samples in the given buffer to 0.0.
#[inline]
pub fn clear_buffer(buffer: &mut [f32]) {
    buffer.fill(0.0);
}

// -------------------------------------------------------------------------------------------------

/// Add the input buffer to the output buffer, sample by sample.
/// When the buffers differ in length, only the common part gets mixed.
#[inline]
pub fn add_buffers(output: &mut [f32], input: &[f32]) {
    for (o, i) in output.iter_mut().zip(input.iter()) {
        *o += *i;
    }
}

// -------------------------------------------------------------------------------------------------

/// Copy the given interleaved stereo buffer into two planar buffers.
/// The number of copied frames is the smallest frame count of all three buffers.
pub fn deinterleave_stereo(interleaved: &[f32], left: &mut [f32], right: &mut [f32]) {
    for ((frame, l), r) in interleaved
        .chunks_exact(2)
        .zip(left.iter_mut())
        .zip(right.iter_mut())
    {
        *l = frame[0];
        *r = frame[1];
    }
}

// -------------------------------------------------------------------------------------------------

/// Copy the given planar channel buffers into one contiguous planar block: all samples of the
/// first channel followed by all samples of the second one, and so on. Only the first
/// `frame_count` samples of each channel are copied.
pub fn concat_planar(channels: &[&[f32]], frame_count: usize, output: &mut Vec<f32>) {
    for channel in channels {
        output.extend_from_slice(&channel[..frame_count]);
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mixing() {
        let mut output = vec![1.0, 2.0, 3.0];
        add_buffers(&mut output, &[0.5, 0.5]);
        assert_eq!(output, vec![1.5, 2.5, 3.0]);
        clear_buffer(&mut output);
        assert_eq!(output, vec![0.0; 3]);
    }

    #[test]
    fn stereo_deinterleave() {
        let interleaved = vec![1.0, 4.0, 2.0, 3.0, 3.0, 2.0, 4.0, 1.0];
        let mut left = vec![0.0; 4];
        let mut right = vec![0.0; 4];
        deinterleave_stereo(&interleaved, &mut left, &mut right);
        assert_eq!(left, vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(right, vec![4.0, 3.0, 2.0, 1.0]);

        // shorter planar buffers only receive their share
        let mut left = vec![0.0; 2];
        let mut right = vec![0.0; 3];
        deinterleave_stereo(&interleaved, &mut left, &mut right);
        assert_eq!(left, vec![1.0, 2.0]);
        assert_eq!(right, vec![4.0, 3.0, 0.0]);
    }

    #[test]
    fn planar_concat() {
        let left: [f32; 4] = [1.0, 2.0, 3.0, 4.0];
        let right: [f32; 4] = [4.0, 3.0, 2.0, 1.0];
        let mut output = Vec::new();
        concat_planar(&[&left, &right], 3, &mut output);
        assert_eq!(output, vec![1.0, 2.0, 3.0, 4.0, 3.0, 2.0]);
    }
}
