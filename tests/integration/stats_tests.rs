//! Channel statistics over the lowest level of a pyramid.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use multiscale_pixels::{open_zarr, MemoryStore, OpenOptions, Pyramid, Selection};

use super::test_utils::add_zarr_array;

/// Two 4x5 channels: `c0` counts 1..=20 row-major, `c1` repeats the column index.
async fn two_channel_pyramid() -> Pyramid {
    let mut store = MemoryStore::new();
    store.insert(
        ".zattrs",
        r#"{"multiscales": [{"axes": ["c", "y", "x"], "datasets": [{"path": "0"}]}]}"#,
    );
    add_zarr_array(&mut store, "0", &[2, 4, 5], &[1, 4, 5], |i| match i[0] {
        0 => (i[1] * 5 + i[2] + 1) as u16,
        _ => i[2] as u16,
    });
    open_zarr(Arc::new(store), &OpenOptions::default(), &CancellationToken::new())
        .await
        .unwrap()
}

#[tokio::test]
async fn test_stats_per_channel() {
    let pyramid = two_channel_pyramid().await;
    let selections = [Selection::new().with("c", 0), Selection::new().with("c", 1)];

    let stats = pyramid
        .channel_stats(&selections, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(stats.len(), 2);

    let counting = &stats[0];
    assert_eq!(counting.min, 1.0);
    assert_eq!(counting.max, 20.0);
    assert_eq!(counting.mean, 10.5);
    assert_eq!(counting.median, 11.0);
    assert_eq!(counting.q1, 6.0);
    assert_eq!(counting.q3, 16.0);
    assert_eq!(counting.auto_window, [1.0, 20.0]);

    // Zeros are left out of the auto window
    let columns = &stats[1];
    assert_eq!(columns.min, 0.0);
    assert_eq!(columns.max, 4.0);
    assert_eq!(columns.mean, 2.0);
    assert_eq!(columns.auto_window, [1.0, 4.0]);
}

#[tokio::test]
async fn test_stats_order_follows_selections() {
    let pyramid = two_channel_pyramid().await;
    let selections = [Selection::new().with("c", 1), Selection::new().with("c", 0)];

    let stats = pyramid
        .channel_stats(&selections, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(stats[0].max, 4.0);
    assert_eq!(stats[1].max, 20.0);
}

#[tokio::test]
async fn test_stats_out_of_range_channel() {
    let pyramid = two_channel_pyramid().await;
    let selections = [Selection::new().with("c", 2)];

    assert!(pyramid
        .channel_stats(&selections, &CancellationToken::new())
        .await
        .is_err());
}

#[tokio::test]
async fn test_stats_cancelled() {
    let pyramid = two_channel_pyramid().await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = pyramid
        .channel_stats(&[Selection::new().with("c", 0)], &cancel)
        .await
        .unwrap_err();
    assert!(err.is_cancelled());
}
