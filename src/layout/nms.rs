use super::Candidate;

/// Greedy non-maximum suppression, class-agnostic.
///
/// Candidates are sorted by descending confidence (stable, so equal
/// confidences keep their input order) and each survivor suppresses later
/// candidates overlapping it beyond `iou_threshold`.
pub(crate) fn nms(candidates: &mut Vec<Candidate>, iou_threshold: f32) {
    candidates.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let mut kept = 0;
    for index in 0..candidates.len() {
        let mut drop = false;
        for prev in 0..kept {
            let iou = candidates[prev].bbox.iou(&candidates[index].bbox);
            if iou > iou_threshold {
                drop = true;
                break;
            }
        }
        if !drop {
            candidates.swap(kept, index);
            kept += 1;
        }
    }
    // Everything after has been swapped
    candidates.truncate(kept);
}
