use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use super::dispatcher::Dispatcher;

/// object stored in one slot on one worker
pub type SlotObject = Arc<dyn Any + Send + Sync>;

/// one worker event loop plus its slot storage.
/// everything reachable through the slots is only mutated via jobs posted
/// to this worker's dispatcher, so updates arrive in posting order.
pub struct Worker {
    pub id: usize,
    pub dispatcher: Dispatcher,
    slots: Mutex<HashMap<usize, SlotObject>>,
}

impl Worker {
    fn slot_object(&self, index: usize) -> Option<SlotObject> {
        self.slots.lock().get(&index).cloned()
    }

    fn set_slot_object(&self, index: usize, obj: SlotObject) {
        self.slots.lock().insert(index, obj);
    }
}

/// registry of workers and allocator of slots, owned by the main thread
pub struct TlsRegistry {
    main: Dispatcher,
    workers: RwLock<Vec<Arc<Worker>>>,
    next_slot: AtomicUsize,
}

impl TlsRegistry {
    pub fn new(main: Dispatcher) -> Arc<TlsRegistry> {
        Arc::new(TlsRegistry {
            main,
            workers: RwLock::new(Vec::new()),
            next_slot: AtomicUsize::new(0),
        })
    }

    pub fn main_dispatcher(&self) -> &Dispatcher {
        &self.main
    }

    /// register one worker event loop
    pub fn register_worker(&self, dispatcher: Dispatcher) -> Arc<Worker> {
        let mut workers = self.workers.write();
        let worker = Arc::new(Worker {
            id: workers.len(),
            dispatcher,
            slots: Mutex::new(HashMap::new()),
        });
        workers.push(worker.clone());
        worker
    }

    pub fn workers(&self) -> Vec<Arc<Worker>> {
        self.workers.read().clone()
    }

    pub fn allocate_slot(registry: &Arc<TlsRegistry>) -> Slot {
        Slot {
            index: registry.next_slot.fetch_add(1, Ordering::SeqCst),
            registry: registry.clone(),
        }
    }
}

/// handle to one cross-worker storage slot
#[derive(Clone)]
pub struct Slot {
    index: usize,
    registry: Arc<TlsRegistry>,
}

impl Slot {
    /// run `init` on every registered worker and store what it returns
    pub fn set<F>(&self, init: F)
    where
        F: Fn(&Worker) -> SlotObject + Send + Sync + 'static,
    {
        let init = Arc::new(init);
        for worker in self.registry.workers() {
            let init = init.clone();
            let index = self.index;
            let target = worker.clone();
            worker.dispatcher.post(move || {
                let obj = init(&target);
                target.set_slot_object(index, obj);
            });
        }
    }

    /// this worker's object in the slot
    pub fn get(&self, worker: &Worker) -> Option<SlotObject> {
        worker.slot_object(self.index)
    }

    /// typed convenience over `get`
    pub fn get_typed<T: Send + Sync + 'static>(&self, worker: &Worker) -> Option<Arc<T>> {
        self.get(worker).and_then(|obj| obj.downcast::<T>().ok())
    }

    /// post `update` to every worker; once all have run, post `completion`
    /// to the main dispatcher
    pub fn run_on_all_threads<F, C>(&self, update: F, completion: C)
    where
        F: Fn(&Worker, Option<SlotObject>) + Send + Sync + 'static,
        C: FnOnce() + Send + 'static,
    {
        let workers = self.registry.workers();
        let update = Arc::new(update);
        let remaining = Arc::new(AtomicUsize::new(workers.len()));
        let completion = Arc::new(Mutex::new(Some(completion)));
        let main = self.registry.main.clone();
        if workers.is_empty() {
            if let Some(done) = completion.lock().take() {
                main.post(done);
            }
            return;
        }
        for worker in workers {
            let update = update.clone();
            let remaining = remaining.clone();
            let completion = completion.clone();
            let main = main.clone();
            let index = self.index;
            let target = worker.clone();
            worker.dispatcher.post(move || {
                update(&target, target.slot_object(index));
                if remaining.fetch_sub(1, Ordering::SeqCst) == 1 {
                    if let Some(done) = completion.lock().take() {
                        main.post(done);
                    }
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn set_populates_every_worker() {
        let registry = TlsRegistry::new(Dispatcher::spawn("main"));
        let w0 = registry.register_worker(Dispatcher::spawn("worker-0"));
        let w1 = registry.register_worker(Dispatcher::spawn("worker-1"));
        let slot = TlsRegistry::allocate_slot(&registry);
        slot.set(|worker| Arc::new(format!("obj-{}", worker.id)) as SlotObject);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(*slot.get_typed::<String>(&w0).unwrap(), "obj-0");
        assert_eq!(*slot.get_typed::<String>(&w1).unwrap(), "obj-1");
    }

    #[tokio::test]
    async fn run_on_all_threads_fires_completion_once() {
        let registry = TlsRegistry::new(Dispatcher::spawn("main"));
        let _w0 = registry.register_worker(Dispatcher::spawn("worker-0"));
        let _w1 = registry.register_worker(Dispatcher::spawn("worker-1"));
        let slot = TlsRegistry::allocate_slot(&registry);
        slot.set(|_| Arc::new(0usize) as SlotObject);
        let touched = Arc::new(AtomicUsize::new(0));
        let counted = touched.clone();
        let (tx, rx) = tokio::sync::oneshot::channel();
        slot.run_on_all_threads(
            move |_, _| {
                counted.fetch_add(1, Ordering::SeqCst);
            },
            move || {
                let _ = tx.send(());
            },
        );
        rx.await.unwrap();
        assert_eq!(touched.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn slots_are_independent() {
        let registry = TlsRegistry::new(Dispatcher::spawn("main"));
        let w0 = registry.register_worker(Dispatcher::spawn("worker-0"));
        let a = TlsRegistry::allocate_slot(&registry);
        let b = TlsRegistry::allocate_slot(&registry);
        a.set(|_| Arc::new(1u32) as SlotObject);
        b.set(|_| Arc::new(2u32) as SlotObject);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(*a.get_typed::<u32>(&w0).unwrap(), 1);
        assert_eq!(*b.get_typed::<u32>(&w0).unwrap(), 2);
    }
}
