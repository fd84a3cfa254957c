use std::pin::Pin;
use std::task::{Context, Poll};

use sqlx_sqlite_conn_mgr::DatabaseRegion;
use tokio::sync::broadcast;
use tokio_stream::Stream;
use tokio_stream::wrappers::BroadcastStream;
use tracing::warn;

use crate::broker::ObservationBroker;
use crate::change::TableChange;

/// A filtered stream of table change notifications.
///
/// Wraps a `BroadcastStream` with an optional per-subscriber [`DatabaseRegion`]
/// filter on top of the broker-wide observed region. Uses proper async
/// wakeups instead of busy-polling.
pub struct TableChangeStream {
   inner: BroadcastStream<TableChange>,
   region: Option<DatabaseRegion>,
}

impl TableChangeStream {
   pub fn new(rx: broadcast::Receiver<TableChange>) -> Self {
      Self {
         inner: BroadcastStream::new(rx),
         region: None,
      }
   }

   /// Narrows this subscriber to changes that intersect `region`.
   pub fn filter_region(mut self, region: DatabaseRegion) -> Self {
      self.region = Some(region);
      self
   }
}

impl Stream for TableChangeStream {
   type Item = TableChange;

   fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
      loop {
         // BroadcastStream is Unpin, so we can safely create a pinned reference
         let inner = Pin::new(&mut self.inner);

         match inner.poll_next(cx) {
            Poll::Ready(Some(Ok(change))) => {
               if let Some(ref region) = self.region
                  && !ObservationBroker::change_intersects(region, &change)
               {
                  continue;
               }
               return Poll::Ready(Some(change));
            }
            Poll::Ready(Some(Err(err))) => {
               // Lagged error - missed some messages due to slow consumption
               warn!(
                  error = %err,
                  "Stream lagged — missed change notifications. Consider increasing channel_capacity."
               );
               continue;
            }
            Poll::Ready(None) => return Poll::Ready(None),
            Poll::Pending => return Poll::Pending,
         }
      }
   }
}

/// Extension trait for converting broadcast receivers into table change streams.
///
/// Provides a convenient way to convert a `broadcast::Receiver<TableChange>` into
/// a `TableChangeStream` that implements `futures::Stream`.
pub trait TableChangeStreamExt {
   /// Converts this receiver into a `TableChangeStream`.
   ///
   /// The returned stream can be further filtered using [`TableChangeStream::filter_region`].
   fn into_stream(self) -> TableChangeStream;
}

impl TableChangeStreamExt for broadcast::Receiver<TableChange> {
   fn into_stream(self) -> TableChangeStream {
      TableChangeStream::new(self)
   }
}
